use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Where the application keeps its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Platform config directory, or `./halfsheet` when none is known
    pub fn discover() -> Self {
        match ProjectDirs::from("", "", "halfsheet") {
            Some(dirs) => Self {
                config_dir: dirs.config_dir().to_owned(),
                logs_dir: dirs.data_local_dir().join("logs"),
            },
            None => Self::rooted(Path::new("halfsheet")),
        }
    }

    /// Everything under one directory
    pub fn rooted(dir: &Path) -> Self {
        Self {
            config_dir: dir.to_owned(),
            logs_dir: dir.join("logs"),
        }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn templates_file(&self) -> PathBuf {
        self.config_dir.join("templates.json")
    }

    /// Default output directory of the spool printer
    pub fn spool_dir(&self) -> PathBuf {
        self.config_dir.join("spool")
    }
}
