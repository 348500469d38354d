use std::process::ExitCode;
use std::time::Duration;

use supervisor::config::{ServiceArgs, ServiceConfig};
use supervisor::error::SupervisorResult;
use supervisor::health::HealthProbe;
use tracing::{info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// One probe of the local health endpoint, for container health checks.
pub async fn run_health(args: ServiceArgs) -> SupervisorResult<ExitCode> {
    let config = ServiceConfig::from_args(args)?;
    let probe = HealthProbe::new(config.health_url(), PROBE_TIMEOUT)?;

    let result = probe.check().await;
    if result.ok {
        info!(url = probe.url(), latency_ms = result.latency.as_millis() as u64, "healthy");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            url = probe.url(),
            error = result.error.as_deref().unwrap_or("unknown"),
            "unhealthy"
        );
        Ok(ExitCode::FAILURE)
    }
}
