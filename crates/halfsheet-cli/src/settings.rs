//! Application settings persisted as JSON next to the templates file.
//!
//! Several processes may share one settings file, so reads and writes take an
//! exclusive lock file first. If the lock cannot be taken within the wait
//! budget the operation goes ahead without it and logs a warning.

use anyhow::{Context, Result};
use halfsheet_layout::constants::DEFAULT_MAX_PIXELS;
use halfsheet_layout::{DEFAULT_TEMPLATE_ID, PaperSize, PrintableArea};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A lock file older than this is left over from a crashed process
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Name of the printer profile created on first run
pub const SPOOL_PRINTER: &str = "spool";

/// Unprintable border of the default spool profile (mm)
const SPOOL_HARDWARE_MARGIN_MM: f64 = 4.0;

/// A printer the spool backend can address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrinterProfile {
    pub name: String,
    pub printable_area: PrintableArea,
}

impl PrinterProfile {
    pub fn spool() -> Self {
        Self {
            name: SPOOL_PRINTER.to_string(),
            printable_area: PrintableArea::inset(PaperSize::A4, SPOOL_HARDWARE_MARGIN_MM),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppSettings {
    pub default_printer: Option<String>,
    pub favorite_printers: Vec<String>,
    pub default_template_id: String,
    /// Kept for compatibility; printing is always sequential
    pub concurrency: usize,
    pub log_level: String,
    pub max_raster_pixels: u64,
    pub printers: Vec<PrinterProfile>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_printer: None,
            favorite_printers: Vec::new(),
            default_template_id: DEFAULT_TEMPLATE_ID.to_string(),
            concurrency: 1,
            log_level: "Information".to_string(),
            max_raster_pixels: DEFAULT_MAX_PIXELS,
            printers: vec![PrinterProfile::spool()],
        }
    }
}

impl AppSettings {
    /// Printer to use: explicit choice, then the saved default, then the
    /// first known printer
    pub fn resolve_printer(&self, explicit: Option<&str>, available: &[String]) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.default_printer.clone().filter(|p| !p.is_empty()))
            .or_else(|| available.first().cloned())
    }

    pub fn is_favorite(&self, printer: &str) -> bool {
        self.favorite_printers.iter().any(|name| name == printer)
    }

    /// Printer profiles with favorites first, in the order they were favorited
    pub fn printers_by_preference(&self) -> Vec<&PrinterProfile> {
        let favorites = self
            .favorite_printers
            .iter()
            .filter_map(|name| self.printers.iter().find(|p| &p.name == name));
        let others = self.printers.iter().filter(|p| !self.is_favorite(&p.name));
        favorites.chain(others).collect()
    }
}

/// Reads and writes one settings file under a cross-process lock
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable settings load as defaults
    pub async fn load(&self) -> AppSettings {
        let _lock = self.lock("load").await;
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable settings {}: {e}", self.path.display());
                AppSettings::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Cannot read settings {}: {e}", self.path.display());
                }
                AppSettings::default()
            }
        }
    }

    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let _lock = self.lock("save").await;
        let json = serde_json::to_string_pretty(settings)?;
        // Write-then-rename so a concurrent reader never sees half a file
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    async fn lock(&self, operation: &str) -> Option<SettingsLock> {
        let dir_exists = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                tokio::fs::try_exists(parent).await.unwrap_or(false)
            }
            _ => true,
        };
        if !dir_exists {
            // Nothing on disk yet, so nothing to guard
            return None;
        }
        let lock = SettingsLock::acquire(&self.lock_path(), self.lock_timeout).await;
        if lock.is_none() {
            log::warn!(
                "Settings lock not acquired within {:?}; continuing {operation} without it",
                self.lock_timeout
            );
        }
        lock
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// Exclusive lock file, removed on drop
#[derive(Debug)]
pub struct SettingsLock {
    path: PathBuf,
}

impl SettingsLock {
    /// Try to create the lock file until `timeout` elapses
    pub async fn acquire(path: &Path, timeout: Duration) -> Option<Self> {
        let started = Instant::now();
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(_) => {
                    return Some(Self {
                        path: path.to_owned(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path).await {
                        log::warn!("Removing stale lock {}", path.display());
                        let _ = tokio::fs::remove_file(path).await;
                        continue;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Parent directory does not exist yet
                    return None;
                }
                Err(e) => {
                    log::warn!("Cannot create lock {}: {e}", path.display());
                    return None;
                }
            }
            if started.elapsed() >= timeout {
                return None;
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}

impl Drop for SettingsLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
