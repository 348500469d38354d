use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::error::{SupervisorError, SupervisorResult};
use crate::paths::ServicePaths;

pub(crate) const DEFAULT_SCHEDULE: &str = "0 */6 * * *";
pub(crate) const DEFAULT_PORT: u16 = 12345;
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Interval between health probes while waiting for the server to come up.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between consecutive restart attempts in one degradation episode.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// Settings read from the environment (or the equivalent flags).
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Cron expression for the scheduled refresh (5 fields)
    #[arg(long, env = "CRON_SCHEDULE", default_value = DEFAULT_SCHEDULE)]
    pub cron_schedule: String,
    /// Per-stream test timeout in seconds, written to config.ini
    #[arg(long, env = "TASK_TIMEOUT", default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub task_timeout: u32,
    /// Concurrency hint for the refresh task, written to config.ini
    #[arg(long, env = "CONCURRENCY", default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,
    /// Base name of the published playlist files
    #[arg(long, env = "OUTPUT_FILENAME", default_value = "live")]
    pub output_filename: String,
    /// Port the static server listens on
    #[arg(long, env = "HTTP_PORT", default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub http_port: u16,

    #[arg(long, env = "CONFIG_DIR", default_value = "/config")]
    pub config_dir: PathBuf,
    #[arg(long, env = "LOG_DIR", default_value = "/log")]
    pub log_dir: PathBuf,
    #[arg(long, env = "OUTPUT_DIR", default_value = "/www/output")]
    pub output_dir: PathBuf,
    #[arg(long, env = "DATA_DIR", default_value = "/data")]
    pub data_dir: PathBuf,
    /// Bundled default config files copied in when missing
    #[arg(long, env = "DEFAULTS_DIR", default_value = "/defaults")]
    pub defaults_dir: PathBuf,

    #[arg(long, env = "WEB_SERVER_BIN", default_value = "nginx")]
    pub web_server_bin: PathBuf,
    #[arg(long, env = "WEB_SERVER_CONF", default_value = "/etc/nginx/nginx.conf")]
    pub web_server_conf: PathBuf,

    /// Absolute path of the refresh task executable
    #[arg(long, env = "BATCH_BIN", default_value = "/app/run.sh")]
    pub batch_bin: PathBuf,
    /// Upper bound for one refresh run, in seconds
    #[arg(long, env = "BATCH_RUN_TIMEOUT", default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_run_timeout: u64,

    #[arg(long, env = "CRONTAB_FILE", default_value = "/etc/crontabs/root")]
    pub crontab_file: PathBuf,
    #[arg(long, env = "CRON_DAEMON", default_value = "crond")]
    pub cron_daemon: String,

    /// Seconds between monitor checks
    #[arg(long, env = "MONITOR_INTERVAL", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub monitor_interval: u64,
    /// Seconds to wait for the health endpoint after a start
    #[arg(long, env = "HEALTH_TIMEOUT", default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    pub health_timeout: u64,
    /// Consecutive failed restarts tolerated before giving up
    #[arg(long, env = "RESTART_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    pub restart_max_attempts: u32,
}

/// Timing and budget knobs for the monitor and the web server manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub health_deadline: Duration,
    pub health_poll_interval: Duration,
    pub restart_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            health_deadline: Duration::from_secs(15),
            health_poll_interval: HEALTH_POLL_INTERVAL,
            restart_backoff: RESTART_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Immutable service configuration, built once at startup and shared by
/// every component.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub schedule: String,
    pub task_timeout: u32,
    pub concurrency: u32,
    /// Output base name without extension (`live` → `live.m3u`, `live.txt`).
    pub output_basename: String,
    pub port: u16,
    pub paths: ServicePaths,
    pub web_server_bin: PathBuf,
    pub web_server_conf: PathBuf,
    pub batch_bin: PathBuf,
    pub batch_timeout: Duration,
    pub crontab_file: PathBuf,
    pub cron_daemon: String,
    pub monitor: MonitorSettings,
}

impl ServiceConfig {
    /// Validate parsed arguments and freeze them into a `ServiceConfig`.
    pub fn from_args(args: ServiceArgs) -> SupervisorResult<Self> {
        validate_schedule(&args.cron_schedule)?;
        let output_basename = normalize_basename(&args.output_filename)?;
        if !args.batch_bin.is_absolute() {
            return Err(SupervisorError::Config(format!(
                "BATCH_BIN must be an absolute path, got {}",
                args.batch_bin.display()
            )));
        }
        if args.cron_daemon.trim().is_empty() {
            return Err(SupervisorError::Config("CRON_DAEMON must not be empty".into()));
        }

        Ok(Self {
            schedule: args.cron_schedule.split_whitespace().collect::<Vec<_>>().join(" "),
            task_timeout: args.task_timeout,
            concurrency: args.concurrency,
            output_basename,
            port: args.http_port,
            paths: ServicePaths::new(
                args.config_dir,
                args.log_dir,
                args.output_dir,
                args.data_dir,
                args.defaults_dir,
            ),
            web_server_bin: args.web_server_bin,
            web_server_conf: args.web_server_conf,
            batch_bin: args.batch_bin,
            batch_timeout: Duration::from_secs(args.batch_run_timeout),
            crontab_file: args.crontab_file,
            cron_daemon: args.cron_daemon,
            monitor: MonitorSettings {
                check_interval: Duration::from_secs(args.monitor_interval),
                health_deadline: Duration::from_secs(args.health_timeout),
                health_poll_interval: HEALTH_POLL_INTERVAL,
                restart_backoff: RESTART_BACKOFF,
                max_attempts: args.restart_max_attempts,
            },
        })
    }

    /// Playlist file name as written to the refresh task's config.
    pub fn output_m3u(&self) -> String {
        format!("{}.m3u", self.output_basename)
    }

    pub fn output_txt(&self) -> String {
        format!("{}.txt", self.output_basename)
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.port)
    }
}

fn validate_schedule(schedule: &str) -> SupervisorResult<()> {
    let fields = schedule.split_whitespace().count();
    if fields != 5 {
        return Err(SupervisorError::Config(format!(
            "CRON_SCHEDULE must have 5 fields, got {fields}: {schedule:?}"
        )));
    }
    Ok(())
}

/// Accept `live` or `live.m3u`; reject empty names and path separators.
fn normalize_basename(name: &str) -> SupervisorResult<String> {
    let name = name.trim();
    let base = name.strip_suffix(".m3u").unwrap_or(name);
    if base.is_empty() {
        return Err(SupervisorError::Config("OUTPUT_FILENAME must not be empty".into()));
    }
    if base.contains('/') {
        return Err(SupervisorError::Config(format!(
            "OUTPUT_FILENAME must be a bare file name, got {name:?}"
        )));
    }
    Ok(base.to_string())
}
