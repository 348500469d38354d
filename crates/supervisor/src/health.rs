//! Health endpoint probing.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{SupervisorError, SupervisorResult};

/// Body the static server answers `/health` with once it is ready.
pub const HEALTHY_BODY: &str = "healthy";

/// Outcome of one probe. Never kept past the current check.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckResult {
    pub ok: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            ok: true,
            latency,
            error: None,
        }
    }

    pub fn unhealthy(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// HTTP client bound to one health URL.
#[derive(Clone)]
pub struct HealthProbe {
    client: Client,
    url: String,
}

impl HealthProbe {
    /// `timeout` bounds each request; keep it at or below the poll interval.
    pub fn new(url: String, timeout: Duration) -> SupervisorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupervisorError::Config(format!("http client: {e}")))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one `GET` and classify the answer.
    pub async fn check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let resp = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => return HealthCheckResult::unhealthy(start.elapsed(), e.to_string()),
        };
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return HealthCheckResult::unhealthy(start.elapsed(), format!("HTTP {status}"));
        }
        match resp.text().await {
            Ok(body) if body.trim() == HEALTHY_BODY => HealthCheckResult::healthy(start.elapsed()),
            Ok(body) => HealthCheckResult::unhealthy(
                start.elapsed(),
                format!("unexpected body: {:?}", truncate(body.trim(), 64)),
            ),
            Err(e) => HealthCheckResult::unhealthy(start.elapsed(), format!("read body: {e}")),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => s.get(..i).unwrap_or(s),
        None => s,
    }
}

/// Poll `probe` every `interval` until it reports healthy or `deadline` has
/// elapsed since the call.
///
/// Each probe is cut off at the deadline, so a timeout is reported no earlier
/// than `deadline` and no later than `deadline` plus the sleep granularity.
/// Returns the last failed result on timeout.
pub async fn wait_for_healthy<F, Fut>(
    mut probe: F,
    deadline: Duration,
    interval: Duration,
) -> Result<HealthCheckResult, HealthCheckResult>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HealthCheckResult>,
{
    let start = Instant::now();
    let give_up = start + deadline;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let remaining = give_up.saturating_duration_since(Instant::now());
        let result = match tokio::time::timeout(remaining.min(interval), probe()).await {
            Ok(r) => r,
            Err(_) => HealthCheckResult::unhealthy(remaining.min(interval), "probe timed out"),
        };
        if result.ok {
            debug!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "health ok");
            return Ok(result);
        }

        let now = Instant::now();
        if now >= give_up {
            return Err(result);
        }
        let next = (now + interval).min(give_up);
        tokio::time::sleep_until(next).await;
    }
}

/// Whether anything accepts TCP connections on `127.0.0.1:port`.
pub async fn listener_open(port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
