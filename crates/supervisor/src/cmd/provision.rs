use supervisor::config::{ServiceArgs, ServiceConfig};
use supervisor::error::SupervisorResult;
use supervisor::lifecycle;

pub async fn run_provision(args: ServiceArgs) -> SupervisorResult<()> {
    let config = ServiceConfig::from_args(args)?;
    lifecycle::prepare(&config).await
}
