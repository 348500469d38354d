use std::path::PathBuf;
use std::time::Duration;

use crate::command::CommandError;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("cannot provision {purpose} directory {}: {detail}", .path.display())]
    Provisioning {
        path: PathBuf,
        purpose: String,
        detail: String,
    },

    #[error("config file {} missing and no bundled default at {}", .target.display(), .default.display())]
    ConfigMissing { target: PathBuf, default: PathBuf },

    #[error("web server config validation failed: {0}")]
    ServerValidation(String),

    #[error("web server not healthy after {}s{}", .deadline.as_secs(), format_log_tail(.log_tail))]
    HealthTimeout {
        deadline: Duration,
        log_tail: Option<String>,
    },

    #[error("web server exited during startup: {0}")]
    ServerExited(String),

    #[error("scheduler unavailable: {0}")]
    SchedulerInstall(String),

    #[error("scheduler daemon failed to start: {0}")]
    SchedulerDaemon(#[from] CommandError),

    #[error("batch task failed: {0}")]
    TaskExecution(String),

    #[error("restart budget exhausted after {attempts} attempts: {reason}")]
    RestartBudgetExhausted { attempts: u32, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Errors the supervisor logs and carries on from, whatever the phase.
    ///
    /// Server validation and health timeouts are fatal only during the first
    /// startup; the monitor decides that from context, so they report `false`.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SchedulerDaemon(_) | Self::TaskExecution(_))
    }
}

fn format_log_tail(tail: &Option<String>) -> String {
    match tail {
        Some(t) if !t.is_empty() => format!("; error log tail:\n{t}"),
        _ => String::new(),
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_split() {
        assert!(SupervisorError::TaskExecution("exit 1".into()).is_recoverable());
        assert!(
            SupervisorError::SchedulerDaemon(CommandError {
                command: "crond".into(),
                detail: "boom".into(),
            })
            .is_recoverable()
        );
        assert!(!SupervisorError::SchedulerInstall("no crond".into()).is_recoverable());
        assert!(
            !SupervisorError::RestartBudgetExhausted {
                attempts: 3,
                reason: "timeout".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn provisioning_message_names_path_and_purpose() {
        let err = SupervisorError::Provisioning {
            path: PathBuf::from("/www/output"),
            purpose: "output".into(),
            detail: "permission denied".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/www/output"), "message was: {msg}");
        assert!(msg.contains("output directory"), "message was: {msg}");
    }

    #[test]
    fn health_timeout_includes_log_tail() {
        let err = SupervisorError::HealthTimeout {
            deadline: Duration::from_secs(15),
            log_tail: Some("bind() failed".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("15s"));
        assert!(msg.contains("bind() failed"));

        let bare = SupervisorError::HealthTimeout {
            deadline: Duration::from_secs(15),
            log_tail: None,
        };
        assert!(!bare.to_string().contains("log tail"));
    }
}
