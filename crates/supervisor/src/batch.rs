//! One-shot execution of the playlist refresh task.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{SupervisorError, SupervisorResult};

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed { elapsed: Duration },
    /// Shutdown was requested while the task ran; the task was killed.
    Cancelled,
}

pub struct BatchRunner {
    bin: PathBuf,
    timeout: Duration,
}

impl BatchRunner {
    pub fn new(bin: PathBuf, timeout: Duration) -> Self {
        Self { bin, timeout }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Run the task to completion.
    ///
    /// A non-zero exit, a timeout and a missing executable are all
    /// [`SupervisorError::TaskExecution`]. The task is killed on timeout and
    /// on cancellation.
    pub async fn run_once(&self, cancel: &CancellationToken) -> SupervisorResult<BatchOutcome> {
        let start = tokio::time::Instant::now();
        info!(bin = %self.bin.display(), "running refresh task");

        let mut child = tokio::process::Command::new(&self.bin)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SupervisorError::TaskExecution(format!("spawn {}: {e}", self.bin.display()))
            })?;

        let forwarders = forward_output(&mut child);

        let waited = tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(self.timeout, child.wait()) => Some(result),
        };

        let status = match waited {
            None => {
                warn!("shutdown requested, killing refresh task");
                let _ = child.kill().await;
                return Ok(BatchOutcome::Cancelled);
            }
            Some(Ok(Ok(status))) => status,
            Some(Ok(Err(e))) => {
                return Err(SupervisorError::TaskExecution(format!("wait: {e}")));
            }
            Some(Err(_)) => {
                let _ = child.kill().await;
                return Err(SupervisorError::TaskExecution(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        // Drain what the task printed before reporting.
        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let elapsed = start.elapsed();
        if !status.success() {
            return Err(SupervisorError::TaskExecution(format!("exited with {status}")));
        }
        info!(elapsed_ms = elapsed.as_millis() as u64, "refresh task finished");
        Ok(BatchOutcome::Completed { elapsed })
    }
}

fn forward_output(child: &mut tokio::process::Child) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "batch", "{line}");
            }
        }));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "batch", "{line}");
            }
        }));
    }
    tasks
}
