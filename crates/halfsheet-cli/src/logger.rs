use chrono::{DateTime, Local, NaiveDate};
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Logger writing to stderr and to a daily file `app-YYYYMMDD.log`.
///
/// `level` is a ceiling; the effective level is `log::max_level()`, which can
/// be lowered or raised after settings load.
pub struct CliLogger {
    level: LevelFilter,
    dir: Option<PathBuf>,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl CliLogger {
    pub fn new(level: LevelFilter, dir: Option<PathBuf>) -> Self {
        Self {
            level,
            dir,
            current: Mutex::new(None),
        }
    }

    pub fn init(self, max_level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn write_file(&self, now: &DateTime<Local>, line: &str) {
        let Some(dir) = &self.dir else {
            return;
        };
        let today = now.date_naive();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        let stale = !matches!(&*current, Some((date, _)) if *date == today);
        if stale {
            *current = open_log_file(dir, today).map(|file| (today, file));
        }
        if let Some((_, file)) = current.as_mut() {
            // Logging must never take the process down
            let _ = writeln!(file, "{line}");
        }
    }
}

/// Path of the log file for `date` inside `dir`
pub fn log_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("app-{}.log", date.format("%Y%m%d")))
}

fn open_log_file(dir: &Path, date: NaiveDate) -> Option<File> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("cannot create log directory {}: {e}", dir.display());
        return None;
    }
    let path = log_file_path(dir, date);
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("cannot open log file {}: {e}", path.display());
            None
        }
    }
}

/// Map a level name to a filter.
///
/// Accepts the names stored in settings files (`Information`, `Warning`,
/// `Verbose`, `Fatal` ...) as well as the `log` crate's own.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    let level = match name.trim().to_ascii_lowercase().as_str() {
        "verbose" | "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "information" | "info" => LevelFilter::Info,
        "warning" | "warn" => LevelFilter::Warn,
        "error" | "fatal" => LevelFilter::Error,
        "off" | "none" => LevelFilter::Off,
        _ => return None,
    };
    Some(level)
}

impl log::Log for CliLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = Local::now();
        let line = format!(
            "{} [{}] {}: {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            level_tag(record.level()),
            record.target(),
            record.args()
        );
        eprintln!("{line}");
        self.write_file(&now, &line);
    }

    fn flush(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, file)) = current.as_mut() {
            let _ = file.flush();
        }
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WRN",
        Level::Info => "INF",
        Level::Debug => "DBG",
        Level::Trace => "VRB",
    }
}
