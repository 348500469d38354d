use serde::Serialize;

/// Lifecycle of the static server as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    NotStarted,
    Starting,
    Healthy,
    Degraded,
    Restarting,
    /// Terminal: the supervisor exits non-zero.
    Failed,
    /// Shut down on request.
    Stopped,
}

impl ServerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// Consecutive failed restart attempts within one process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartState {
    attempt_count: u32,
    max_attempts: u32,
    last_failure_reason: Option<String>,
}

impl RestartState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            last_failure_reason: None,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_failure_reason(&self) -> Option<&str> {
        self.last_failure_reason.as_deref()
    }

    /// `true` while another restart may be attempted.
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Reset after a confirmed healthy restart.
    pub fn on_success(&mut self) {
        self.attempt_count = 0;
        self.last_failure_reason = None;
    }

    /// Record a failed attempt. Returns `false` once the budget is spent.
    #[must_use]
    pub fn on_failure(&mut self, reason: impl Into<String>) -> bool {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_failure_reason = Some(reason.into());
        self.can_retry()
    }
}
