use std::path::{Path, PathBuf};

use crate::provision::DirectorySpec;

/// Bundled/required config file names (relative to config and defaults dirs).
pub const CONFIG_INI: &str = "config.ini";
pub const SOURCES_SUBDIR: &str = "sources";
pub const ONLINE_SUBDIR: &str = "online";

/// Container paths derived from the configured base directories.
#[derive(Debug, Clone, PartialEq)]
pub struct ServicePaths {
    config_dir: PathBuf,
    log_dir: PathBuf,
    output_dir: PathBuf,
    data_dir: PathBuf,
    defaults_dir: PathBuf,
}

impl ServicePaths {
    pub fn new(
        config_dir: PathBuf,
        log_dir: PathBuf,
        output_dir: PathBuf,
        data_dir: PathBuf,
        defaults_dir: PathBuf,
    ) -> Self {
        Self {
            config_dir,
            log_dir,
            output_dir,
            data_dir,
            defaults_dir,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn defaults_dir(&self) -> &Path {
        &self.defaults_dir
    }

    /// Batch task settings file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_INI)
    }

    /// Locally maintained source lists.
    pub fn sources_dir(&self) -> PathBuf {
        self.config_dir.join(SOURCES_SUBDIR)
    }

    /// Downloaded online sources staged for the batch task.
    pub fn online_dir(&self) -> PathBuf {
        self.config_dir.join(ONLINE_SUBDIR)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("web.pid")
    }

    pub fn status_file(&self) -> PathBuf {
        self.data_dir.join("supervisor.json")
    }

    /// Error log the bundled static server config writes to.
    pub fn server_error_log(&self) -> PathBuf {
        self.log_dir.join("nginx_error.log")
    }

    /// Append target for scheduled batch runs.
    pub fn batch_log(&self) -> PathBuf {
        self.log_dir.join("cron.log")
    }

    /// Every directory that must exist and be writable before anything starts.
    pub fn directories(&self) -> Vec<DirectorySpec> {
        vec![
            DirectorySpec::new(self.config_dir.clone(), "config"),
            DirectorySpec::new(self.sources_dir(), "local sources"),
            DirectorySpec::new(self.online_dir(), "online sources"),
            DirectorySpec::new(self.log_dir.clone(), "log"),
            DirectorySpec::new(self.output_dir.clone(), "output"),
            DirectorySpec::new(self.data_dir.clone(), "data"),
        ]
    }
}
