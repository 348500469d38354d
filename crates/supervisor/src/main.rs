mod cmd;

use std::fmt;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use supervisor::config::ServiceArgs;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

/// UTC wall-clock timestamps, so supervisor lines sort with the server's logs.
struct WallClock;

impl FormatTime for WallClock {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

#[derive(Parser)]
#[command(name = "supervisor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision, start the web server, schedule the refresh and supervise
    Start(ServiceArgs),
    /// Create directories and config files, then exit
    Provision(ServiceArgs),
    /// Probe the local health endpoint once (exit 0 when healthy)
    Health(ServiceArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(WallClock)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start(args) => cmd::run_start(args).await.map(|()| ExitCode::SUCCESS),
        Command::Provision(args) => cmd::run_provision(args).await.map(|()| ExitCode::SUCCESS),
        Command::Health(args) => cmd::run_health(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}
