use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first SIGTERM, SIGINT or SIGHUP.
///
/// Handlers are registered before this returns, so a signal delivered right
/// after the call is not lost.
pub fn spawn_shutdown_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");
    let mut sighup = register(SignalKind::hangup(), "SIGHUP");

    tokio::spawn(async move {
        tokio::select! {
            _ = recv_signal(&mut sigterm) => info!("received SIGTERM, shutting down"),
            _ = recv_signal(&mut sigint) => info!("received SIGINT, shutting down"),
            _ = recv_signal(&mut sighup) => info!("received SIGHUP, shutting down"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    })
}

fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(signal = name, error = %e, "failed to install signal handler");
            None
        }
    }
}

async fn recv_signal(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
