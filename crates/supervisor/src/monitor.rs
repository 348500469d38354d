//! Steady-state supervision of the web server.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MonitorSettings;
use crate::error::{SupervisorError, SupervisorResult};
use crate::state::{RestartState, ServerState};
use crate::status::StatusTracker;
use crate::web::ManagedServer;

/// Consecutive failed health checks of a live server before logging at `error`.
const UNHEALTHY_ESCALATION: u32 = 3;

/// Owns the server and its restart budget for the lifetime of the process.
pub struct Monitor<S> {
    server: S,
    settings: MonitorSettings,
    restart: RestartState,
    state: ServerState,
    status: StatusTracker,
    health_failures: u32,
}

impl<S: ManagedServer> Monitor<S> {
    pub fn new(server: S, settings: MonitorSettings, status: StatusTracker) -> Self {
        Self {
            server,
            restart: RestartState::new(settings.max_attempts),
            settings,
            state: ServerState::NotStarted,
            status,
            health_failures: 0,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn restart_state(&self) -> &RestartState {
        &self.restart
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    /// Record a state change and publish it to the status file.
    pub async fn set_state(&mut self, state: ServerState) {
        if state != self.state {
            info!(from = ?self.state, to = ?state, "server state");
        }
        self.state = state;
        self.status
            .publish(state, &self.restart, self.server.pid())
            .await;
    }

    /// Check the server every `check_interval` until cancelled.
    ///
    /// Returns `Ok` on cancellation and `Err` once the restart budget is spent.
    pub async fn run(&mut self, cancel: &CancellationToken) -> SupervisorResult<()> {
        info!(
            interval_s = self.settings.check_interval.as_secs(),
            max_attempts = self.settings.max_attempts,
            "monitor started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.settings.check_interval) => {}
            }
            self.check_once(cancel).await?;
        }
    }

    /// One monitor tick: restart a dead server, otherwise observe its health.
    pub async fn check_once(&mut self, cancel: &CancellationToken) -> SupervisorResult<()> {
        if !self.server.is_alive() {
            warn!("web server is not running");
            return self.recover(cancel).await;
        }
        self.observe_health().await;
        Ok(())
    }

    /// Restart until healthy or until the budget is spent.
    async fn recover(&mut self, cancel: &CancellationToken) -> SupervisorResult<()> {
        self.set_state(ServerState::Degraded).await;

        loop {
            self.set_state(ServerState::Restarting).await;
            let attempt = self.restart.attempt_count().saturating_add(1);
            info!(attempt, max = self.restart.max_attempts(), "restarting web server");

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                r = self.restart_attempt() => r,
            };

            let reason = match result {
                Ok(()) => {
                    self.restart.on_success();
                    self.health_failures = 0;
                    self.set_state(ServerState::Healthy).await;
                    info!(attempt, pid = self.server.pid(), "web server recovered");
                    return Ok(());
                }
                Err(e) => e.to_string(),
            };

            let can_retry = self.restart.on_failure(reason.clone());
            self.set_state(ServerState::Degraded).await;
            if !can_retry {
                error!(
                    attempts = self.restart.attempt_count(),
                    reason = %reason,
                    "restart budget exhausted"
                );
                self.server.stop().await;
                self.set_state(ServerState::Failed).await;
                return Err(SupervisorError::RestartBudgetExhausted {
                    attempts: self.restart.attempt_count(),
                    reason,
                });
            }
            warn!(attempt, reason = %reason, "restart attempt failed");

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.settings.restart_backoff) => {}
            }
        }
    }

    async fn restart_attempt(&mut self) -> SupervisorResult<()> {
        self.server.stop().await;

        let report = self.server.validate_configuration().await;
        if !report.passed {
            warn!(diagnostics = %report.diagnostics, "web server config self-test failed");
        }

        self.server.start().await?;
        self.server
            .wait_for_healthy(self.settings.health_deadline)
            .await?;
        Ok(())
    }

    /// Listener and health endpoint checks on a live server. Log only.
    async fn observe_health(&mut self) {
        let listening = self.server.listener_open().await;
        let result = self.server.probe().await;

        if listening && result.ok {
            if self.health_failures > 0 {
                info!(
                    after = self.health_failures,
                    latency_ms = result.latency.as_millis() as u64,
                    "web server healthy again"
                );
            }
            self.health_failures = 0;
            if self.state != ServerState::Healthy {
                self.set_state(ServerState::Healthy).await;
            }
            return;
        }

        self.health_failures = self.health_failures.saturating_add(1);
        let detail = if listening {
            result.error.unwrap_or_else(|| "unknown".into())
        } else {
            "listener not accepting connections".to_string()
        };
        if self.health_failures >= UNHEALTHY_ESCALATION {
            error!(consecutive = self.health_failures, error = %detail, "web server unhealthy");
        } else {
            warn!(consecutive = self.health_failures, error = %detail, "web server unhealthy");
        }
        if self.state != ServerState::Degraded {
            self.set_state(ServerState::Degraded).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::health::HealthCheckResult;
    use crate::web::ValidationReport;

    /// Scripted server: each start pops one health outcome (default: never healthy).
    #[derive(Default)]
    struct FakeServer {
        alive: bool,
        probe_ok: bool,
        listening: bool,
        outcomes: VecDeque<bool>,
        starts: u32,
        stops: u32,
    }

    impl FakeServer {
        fn running() -> Self {
            Self {
                alive: true,
                probe_ok: true,
                listening: true,
                ..Default::default()
            }
        }

        fn dead(outcomes: &[bool]) -> Self {
            Self {
                outcomes: outcomes.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ManagedServer for FakeServer {
        async fn validate_configuration(&self) -> ValidationReport {
            ValidationReport {
                passed: true,
                diagnostics: String::new(),
            }
        }

        async fn start(&mut self) -> SupervisorResult<()> {
            self.starts += 1;
            self.alive = true;
            Ok(())
        }

        async fn wait_for_healthy(&mut self, deadline: Duration) -> SupervisorResult<HealthCheckResult> {
            if self.outcomes.pop_front().unwrap_or(false) {
                self.probe_ok = true;
                self.listening = true;
                Ok(HealthCheckResult::healthy(Duration::ZERO))
            } else {
                Err(SupervisorError::HealthTimeout {
                    deadline,
                    log_tail: None,
                })
            }
        }

        async fn probe(&self) -> HealthCheckResult {
            if self.probe_ok {
                HealthCheckResult::healthy(Duration::ZERO)
            } else {
                HealthCheckResult::unhealthy(Duration::ZERO, "HTTP 502 Bad Gateway")
            }
        }

        async fn listener_open(&self) -> bool {
            self.listening
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        async fn stop(&mut self) {
            self.stops += 1;
            self.alive = false;
        }

        fn pid(&self) -> Option<u32> {
            self.alive.then_some(4242)
        }
    }

    fn settings(max_attempts: u32) -> MonitorSettings {
        MonitorSettings {
            max_attempts,
            ..MonitorSettings::default()
        }
    }

    fn monitor(server: FakeServer, max_attempts: u32, dir: &tempfile::TempDir) -> Monitor<FakeServer> {
        let status = StatusTracker::new(dir.path().join("supervisor.json"));
        Monitor::new(server, settings(max_attempts), status)
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_max_attempts_then_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(FakeServer::dead(&[]), 3, &dir);

        let err = monitor.check_once(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::RestartBudgetExhausted { attempts: 3, .. }
        ));
        assert_eq!(monitor.server().starts, 3);
        assert_eq!(monitor.state(), ServerState::Failed);
        assert!(!monitor.server().alive);

        let status: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("supervisor.json")).unwrap())
                .unwrap();
        assert_eq!(status["state"], "failed");
        assert_eq!(status["restart_attempts"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_propagates_budget_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(FakeServer::dead(&[]), 2, &dir);

        let result = monitor.run(&CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(monitor.server().starts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_restart_resets_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut monitor = monitor(FakeServer::dead(&[false, true]), 3, &dir);

        monitor.check_once(&cancel).await.unwrap();
        assert_eq!(monitor.server().starts, 2);
        assert_eq!(monitor.restart_state().attempt_count(), 0);
        assert_eq!(monitor.state(), ServerState::Healthy);

        // Without the reset this episode would exhaust the budget on its second failure.
        let server = monitor.server_mut();
        server.alive = false;
        server.outcomes = VecDeque::from([false, false, true]);
        monitor.check_once(&cancel).await.unwrap();
        assert_eq!(monitor.server().starts, 5);
        assert_eq!(monitor.state(), ServerState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_separated_by_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(FakeServer::dead(&[false, false, true]), 3, &dir);

        let start = Instant::now();
        monitor.check_once(&CancellationToken::new()).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= crate::config::RESTART_BACKOFF * 2, "elapsed {elapsed:?}");
        assert!(elapsed < crate::config::RESTART_BACKOFF * 3, "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_sleep_exits_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(FakeServer::running(), 3, &dir);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        monitor.run(&cancel).await.unwrap();
        assert!(start.elapsed() <= Duration::from_secs(1));
        assert_eq!(monitor.server().starts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_restarting() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(FakeServer::dead(&[]), 3, &dir);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        monitor.check_once(&cancel).await.unwrap();
        assert_eq!(monitor.server().starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_live_server_is_not_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::running();
        server.probe_ok = false;
        let mut monitor = monitor(server, 3, &dir);
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            monitor.check_once(&cancel).await.unwrap();
        }
        assert_eq!(monitor.server().starts, 0);
        assert_eq!(monitor.server().stops, 0);
        assert_eq!(monitor.state(), ServerState::Degraded);
        assert_eq!(monitor.health_failures, 4);

        monitor.server_mut().probe_ok = true;
        monitor.check_once(&cancel).await.unwrap();
        assert_eq!(monitor.state(), ServerState::Healthy);
        assert_eq!(monitor.health_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_listener_counts_as_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = FakeServer::running();
        server.listening = false;
        let mut monitor = monitor(server, 3, &dir);

        monitor.check_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(monitor.state(), ServerState::Degraded);
        assert_eq!(monitor.server().starts, 0);
    }
}
