//! Cron registration for the periodic refresh.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::atomic;
use crate::command;
use crate::config::ServiceConfig;
use crate::error::{SupervisorError, SupervisorResult};

/// Upper bound for the daemon's foreground part before it backgrounds itself.
const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(10);

/// One crontab entry: `<schedule> <command> >> <log> 2>&1`.
#[derive(Debug, Clone, PartialEq)]
pub struct CronJob {
    pub schedule: String,
    pub command: PathBuf,
    pub log_path: PathBuf,
}

impl CronJob {
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            schedule: config.schedule.clone(),
            command: config.batch_bin.clone(),
            log_path: config.paths.batch_log(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{} {} >> {} 2>&1",
            self.schedule,
            self.command.display(),
            self.log_path.display()
        )
    }

    /// Whether an existing crontab line runs this job's command.
    fn matches_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return false;
        }
        let command = self.command.display().to_string();
        line.split_whitespace().any(|token| token == command)
    }
}

/// What happened when the job was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Job installed and the daemon is running.
    Active,
    /// Job installed, but the daemon could not be started.
    /// Refresh then only happens at container start.
    StartupOnly,
}

/// Installs the job and keeps the cron daemon running.
pub struct SchedulerRegistrar {
    crontab_file: PathBuf,
    daemon: String,
}

impl SchedulerRegistrar {
    pub fn new(crontab_file: PathBuf, daemon: String) -> Self {
        Self {
            crontab_file,
            daemon,
        }
    }

    pub fn from_service(config: &ServiceConfig) -> Self {
        Self::new(config.crontab_file.clone(), config.cron_daemon.clone())
    }

    /// Install `job` and start the daemon.
    ///
    /// Errors only when the scheduler mechanism is unavailable: the daemon
    /// binary is missing or the crontab cannot be written. A daemon that
    /// fails to start is logged and reported as [`Registration::StartupOnly`].
    pub async fn register(&self, job: &CronJob) -> SupervisorResult<Registration> {
        let daemon_path = which::which(&self.daemon).map_err(|e| {
            SupervisorError::SchedulerInstall(format!("{} not found: {e}", self.daemon))
        })?;

        install_job(&self.crontab_file, job).await?;
        info!(
            crontab = %self.crontab_file.display(),
            schedule = %job.schedule,
            "refresh job installed"
        );

        match self.ensure_daemon(&daemon_path).await {
            Ok(()) => Ok(Registration::Active),
            Err(e) => {
                warn!(error = %e, "scheduler daemon not running, refresh will only run at startup");
                Ok(Registration::StartupOnly)
            }
        }
    }

    async fn ensure_daemon(&self, daemon_path: &Path) -> SupervisorResult<()> {
        if self.daemon_running().await {
            info!(daemon = %self.daemon, "scheduler daemon already running");
            return Ok(());
        }
        // crond forks into the background and returns.
        let path = daemon_path.display().to_string();
        command::run_detached(&path, &[], DAEMON_START_TIMEOUT).await?;
        info!(daemon = %self.daemon, "scheduler daemon started");
        Ok(())
    }

    async fn daemon_running(&self) -> bool {
        let name = Path::new(&self.daemon)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.daemon.clone());
        command::succeeds("pgrep", &["-x", &name]).await
    }
}

/// Write `job` into the crontab file, replacing any line that already runs
/// the same command and keeping everything else.
pub async fn install_job(crontab: &Path, job: &CronJob) -> SupervisorResult<()> {
    let unavailable =
        |e: std::io::Error| SupervisorError::SchedulerInstall(format!("{}: {e}", crontab.display()));

    let existing = match tokio::fs::read_to_string(crontab).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(unavailable(e)),
    };
    let updated = merge_crontab(&existing, job);
    if updated == existing {
        return Ok(());
    }

    if let Some(parent) = crontab.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
    }
    atomic::write_file(crontab, updated.as_bytes())
        .await
        .map_err(unavailable)
}

fn merge_crontab(existing: &str, job: &CronJob) -> String {
    let entry = job.render();
    let mut lines: Vec<String> = Vec::new();
    let mut placed = false;
    for line in existing.lines() {
        if job.matches_line(line) {
            if !placed {
                lines.push(entry.clone());
                placed = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }
    if !placed {
        lines.push(entry);
    }
    let mut out = lines.join("\n");
    // crond ignores a last line without a newline.
    out.push('\n');
    out
}
