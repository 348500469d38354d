use std::sync::Arc;

use supervisor::config::{ServiceArgs, ServiceConfig};
use supervisor::error::SupervisorResult;
use supervisor::lifecycle::Supervisor;
use supervisor::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the full container lifecycle until a shutdown signal or a fatal error.
pub async fn run_start(args: ServiceArgs) -> SupervisorResult<()> {
    let config = Arc::new(ServiceConfig::from_args(args)?);
    info!(
        port = config.port,
        schedule = %config.schedule,
        output = %config.output_m3u(),
        max_restarts = config.monitor.max_attempts,
        "starting supervisor"
    );

    // Installed before anything is spawned so an early SIGTERM still stops cleanly.
    let cancel = CancellationToken::new();
    let signals = signal::spawn_shutdown_listener(cancel.clone());

    let mut supervisor = Supervisor::from_config(config, cancel.clone())?;
    let result = supervisor.run().await;

    cancel.cancel();
    let _ = signals.await;
    result
}
