//! Machine-readable view of the supervisor for operators and probes.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use crate::atomic;
use crate::state::{RestartState, ServerState};

#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    state: ServerState,
    restart_attempts: u32,
    max_restart_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_failure: Option<&'a str>,
    server_pid: Option<u32>,
    started_at: String,
    updated_at: String,
}

fn iso_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Keeps `<DATA_DIR>/supervisor.json` in step with the server state.
///
/// The file is informational: write failures are logged, never returned.
pub struct StatusTracker {
    path: PathBuf,
    started_at: DateTime<Utc>,
}

impl StatusTracker {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            started_at: Utc::now(),
        }
    }

    pub async fn publish(&self, state: ServerState, restart: &RestartState, server_pid: Option<u32>) {
        let snapshot = Snapshot {
            state,
            restart_attempts: restart.attempt_count(),
            max_restart_attempts: restart.max_attempts(),
            last_failure: restart.last_failure_reason(),
            server_pid,
            started_at: iso_millis(self.started_at),
            updated_at: iso_millis(Utc::now()),
        };

        let mut json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "status snapshot not serializable");
                return;
            }
        };
        json.push(b'\n');

        if let Err(e) = atomic::write_file(&self.path, &json).await {
            warn!(error = %e, path = %self.path.display(), "status file not updated");
        }
    }
}
