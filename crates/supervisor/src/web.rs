//! Static file server process: self-test, spawn, health wait, liveness, stop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};

use crate::command;
use crate::config::ServiceConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::health::{self, HealthCheckResult, HealthProbe};

/// Time allowed for a graceful shutdown before SIGKILL.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines of the server error log attached to a health timeout.
const LOG_TAIL_LINES: usize = 20;

/// Bytes read from the end of the error log when building the tail.
const LOG_TAIL_BYTES: u64 = 16 * 1024;

/// Result of the server's configuration self-test.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub passed: bool,
    pub diagnostics: String,
}

/// Operations the monitor needs from a supervised server.
#[async_trait]
pub trait ManagedServer: Send {
    /// Run the server's config self-test.
    async fn validate_configuration(&self) -> ValidationReport;
    /// Spawn the server process. Replaces any previously recorded handle.
    async fn start(&mut self) -> SupervisorResult<()>;
    /// Poll the health endpoint until it answers or `deadline` elapses.
    async fn wait_for_healthy(&mut self, deadline: Duration) -> SupervisorResult<HealthCheckResult>;
    /// Single health probe.
    async fn probe(&self) -> HealthCheckResult;
    /// Whether anything accepts connections on the server's port.
    async fn listener_open(&self) -> bool;
    /// Whether the recorded process is still running. Clears the handle
    /// once the process is confirmed dead.
    fn is_alive(&mut self) -> bool;
    /// Best-effort termination of the recorded process.
    async fn stop(&mut self);
    /// PID of the recorded process, if any.
    fn pid(&self) -> Option<u32>;
}

/// The spawned server process, owned by [`StaticServer`].
#[derive(Debug)]
pub struct ChildProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub command_line: String,
    child: tokio::process::Child,
}

/// Settings for launching the static server.
#[derive(Debug, Clone)]
pub struct StaticServerConfig {
    pub binary: PathBuf,
    pub conf: PathBuf,
    pub port: u16,
    pub pid_file: PathBuf,
    pub error_log: PathBuf,
    pub poll_interval: Duration,
}

impl StaticServerConfig {
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            binary: config.web_server_bin.clone(),
            conf: config.web_server_conf.clone(),
            port: config.port,
            pid_file: config.paths.pid_file(),
            error_log: config.paths.server_error_log(),
            poll_interval: config.monitor.health_poll_interval,
        }
    }
}

/// nginx-style static file server run in the foreground as a child process.
pub struct StaticServer {
    config: StaticServerConfig,
    probe: HealthProbe,
    handle: Option<ChildProcessHandle>,
}

impl StaticServer {
    pub fn new(config: StaticServerConfig) -> SupervisorResult<Self> {
        let url = format!("http://127.0.0.1:{}/health", config.port);
        let probe = HealthProbe::new(url, config.poll_interval)?;
        Ok(Self {
            config,
            probe,
            handle: None,
        })
    }

    pub fn handle(&self) -> Option<&ChildProcessHandle> {
        self.handle.as_ref()
    }

    fn conf_arg(&self) -> String {
        self.config.conf.display().to_string()
    }

    fn clear_handle(&mut self) {
        self.handle = None;
        match std::fs::remove_file(&self.config.pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.config.pid_file.display(), "failed to remove pid file"),
        }
    }
}

#[async_trait]
impl ManagedServer for StaticServer {
    async fn validate_configuration(&self) -> ValidationReport {
        let binary = self.config.binary.display().to_string();
        let conf = self.conf_arg();
        match command::exec(&binary, &["-t", "-c", &conf]).await {
            Ok(out) => ValidationReport {
                passed: true,
                diagnostics: out,
            },
            Err(e) => ValidationReport {
                passed: false,
                diagnostics: e.detail,
            },
        }
    }

    async fn start(&mut self) -> SupervisorResult<()> {
        if self.handle.is_some() {
            self.stop().await;
        }

        let conf = self.conf_arg();
        let args = ["-c", conf.as_str(), "-g", "daemon off;"];
        let command_line = format!("{} -c {conf} -g 'daemon off;'", self.config.binary.display());

        let mut cmd = tokio::process::Command::new(&self.config.binary);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        info!(port = self.config.port, command = %command_line, "starting web server");

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::ServerExited(format!("spawn {}: {e}", self.config.binary.display()))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::ServerExited("exited before pid was read".into()))?;

        forward_output(&mut child);

        tokio::fs::write(&self.config.pid_file, format!("{pid}\n")).await?;

        self.handle = Some(ChildProcessHandle {
            pid,
            started_at: Utc::now(),
            command_line,
            child,
        });
        info!(pid, "web server spawned");
        Ok(())
    }

    async fn wait_for_healthy(&mut self, deadline: Duration) -> SupervisorResult<HealthCheckResult> {
        let interval = self.config.poll_interval;
        let probe = self.probe.clone();
        let Some(handle) = self.handle.as_mut() else {
            return Err(SupervisorError::ServerExited("not started".into()));
        };

        // A process that dies while we poll fails the wait immediately.
        let outcome = tokio::select! {
            result = health::wait_for_healthy(
                || {
                    let probe = probe.clone();
                    async move { probe.check().await }
                },
                deadline,
                interval,
            ) => Ok(result),
            status = handle.child.wait() => Err(status),
        };

        match outcome {
            Ok(Ok(r)) => {
                info!(latency_ms = r.latency.as_millis() as u64, "web server healthy");
                Ok(r)
            }
            Ok(Err(last)) => {
                warn!(error = last.error.as_deref().unwrap_or("unknown"), "health wait timed out");
                Err(SupervisorError::HealthTimeout {
                    deadline,
                    log_tail: read_log_tail(&self.config.error_log).await,
                })
            }
            Err(status) => {
                let status = match status {
                    Ok(s) => s.to_string(),
                    Err(e) => format!("wait: {e}"),
                };
                self.clear_handle();
                let detail = match read_log_tail(&self.config.error_log).await {
                    Some(t) if !t.is_empty() => format!("{status}; error log tail:\n{t}"),
                    _ => status,
                };
                Err(SupervisorError::ServerExited(detail))
            }
        }
    }

    async fn probe(&self) -> HealthCheckResult {
        self.probe.check().await
    }

    async fn listener_open(&self) -> bool {
        health::listener_open(self.config.port, self.config.poll_interval).await
    }

    fn is_alive(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        match handle.child.try_wait() {
            Ok(None) => return true,
            Ok(Some(status)) => warn!(pid = handle.pid, code = status.code(), "web server exited"),
            Err(e) => warn!(pid = handle.pid, error = %e, "web server wait failed"),
        }
        self.clear_handle();
        false
    }

    /// Graceful stop (SIGTERM → timeout → SIGKILL).
    async fn stop(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        info!(pid = handle.pid, "stopping web server");
        send_sigterm(handle.pid);

        match tokio::time::timeout(STOP_TIMEOUT, handle.child.wait()).await {
            Ok(Ok(status)) => info!(code = status.code(), "web server stopped"),
            Ok(Err(e)) => warn!(error = %e, "web server wait failed"),
            Err(_) => {
                warn!("web server did not exit in time, sending SIGKILL");
                let _ = handle.child.kill().await;
            }
        }
        self.clear_handle();
    }

    fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }
}

/// Stream the server's stdout/stderr into the supervisor log.
fn forward_output(child: &mut tokio::process::Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    info!(target: "web", "{line}");
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    warn!(target: "web", "stderr: {line}");
                }
            }
        });
    }
}

fn send_sigterm(pid: u32) {
    if let Ok(pid) = i32::try_from(pid) {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
}

/// Last lines of a log file, or `None` if it cannot be read.
pub async fn read_log_tail(path: &Path) -> Option<String> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    file.seek(std::io::SeekFrom::Start(start)).await.ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.ok()?;

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
    Some(lines.into_iter().skip(skip).collect::<Vec<_>>().join("\n"))
}
