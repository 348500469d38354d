//! Startup sequence and shutdown of the whole container service.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{BatchOutcome, BatchRunner};
use crate::config::ServiceConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::materialize;
use crate::monitor::Monitor;
use crate::provision;
use crate::scheduler::{CronJob, Registration, SchedulerRegistrar};
use crate::state::ServerState;
use crate::status::StatusTracker;
use crate::web::{ManagedServer, StaticServer, StaticServerConfig};

/// Directories, placeholder outputs and config files. Safe to run repeatedly.
pub async fn prepare(config: &ServiceConfig) -> SupervisorResult<()> {
    provision::ensure_directories(&config.paths.directories()).await?;
    provision::seed_placeholder_outputs(config.paths.output_dir(), &config.output_basename).await?;
    materialize::materialize(&materialize::required_configs(config)).await?;
    info!("environment prepared");
    Ok(())
}

/// Owns the service for the lifetime of the process.
pub struct Supervisor<S> {
    config: Arc<ServiceConfig>,
    monitor: Monitor<S>,
    cancel: CancellationToken,
}

impl Supervisor<StaticServer> {
    pub fn from_config(config: Arc<ServiceConfig>, cancel: CancellationToken) -> SupervisorResult<Self> {
        let server = StaticServer::new(StaticServerConfig::from_service(&config))?;
        Ok(Self::new(config, server, cancel))
    }
}

impl<S: ManagedServer> Supervisor<S> {
    pub fn new(config: Arc<ServiceConfig>, server: S, cancel: CancellationToken) -> Self {
        let status = StatusTracker::new(config.paths.status_file());
        let monitor = Monitor::new(server, config.monitor, status);
        Self {
            config,
            monitor,
            cancel,
        }
    }

    pub fn state(&self) -> ServerState {
        self.monitor.state()
    }

    pub fn server(&self) -> &S {
        self.monitor.server()
    }

    /// Run until a shutdown signal (`Ok`) or a fatal error (`Err`).
    ///
    /// The web server is stopped on every exit path.
    pub async fn run(&mut self) -> SupervisorResult<()> {
        let result = self.lifecycle().await;

        self.monitor.server_mut().stop().await;
        match &result {
            Ok(()) => {
                self.monitor.set_state(ServerState::Stopped).await;
                info!("supervisor stopped");
            }
            Err(_) => self.monitor.set_state(ServerState::Failed).await,
        }
        result
    }

    async fn lifecycle(&mut self) -> SupervisorResult<()> {
        prepare(&self.config).await?;

        if !self.start_server().await? {
            return Ok(());
        }

        let registration = SchedulerRegistrar::from_service(&self.config)
            .register(&CronJob::from_service(&self.config))
            .await?;
        if registration == Registration::StartupOnly {
            warn!("playlist refresh will not run on schedule");
        }

        let batch = BatchRunner::new(self.config.batch_bin.clone(), self.config.batch_timeout);
        match batch.run_once(&self.cancel).await {
            Ok(BatchOutcome::Completed { .. }) => {}
            Ok(BatchOutcome::Cancelled) => return Ok(()),
            Err(e) => warn!(error = %e, "initial refresh failed, serving existing output"),
        }

        self.monitor.run(&self.cancel).await
    }

    /// Self-test, spawn and wait for health. Returns `false` if shutdown was
    /// requested before the server became healthy.
    async fn start_server(&mut self) -> SupervisorResult<bool> {
        self.monitor.set_state(ServerState::Starting).await;

        let server = self.monitor.server_mut();
        let report = server.validate_configuration().await;
        if !report.passed {
            return Err(SupervisorError::ServerValidation(report.diagnostics));
        }
        info!("web server config self-test passed");

        server.start().await?;
        let deadline = self.config.monitor.health_deadline;
        let healthy = tokio::select! {
            _ = self.cancel.cancelled() => None,
            r = server.wait_for_healthy(deadline) => Some(r),
        };
        match healthy {
            None => Ok(false),
            Some(result) => {
                result?;
                self.monitor.set_state(ServerState::Healthy).await;
                Ok(true)
            }
        }
    }
}
