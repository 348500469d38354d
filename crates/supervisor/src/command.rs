//! Short-lived helper commands (`nginx -t`, `pgrep`, `crond`).

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
#[error("`{command}` failed: {detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn output(program: &str, args: &[&str]) -> Result<Output, CommandError> {
    let line = command_line(program, args);
    trace!(command = %line, "exec");
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CommandError {
            command: line,
            detail: e.to_string(),
        })
}

/// What a failed command had to say: stderr, else stdout, else the status.
fn failure_detail(out: &Output) -> String {
    [&out.stderr, &out.stdout]
        .into_iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| format!("exited with {}", out.status))
}

/// Run to completion and return trimmed stdout.
pub async fn exec(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let out = output(program, args).await?;
    if out.status.success() {
        return Ok(String::from_utf8_lossy(&out.stdout).trim().to_string());
    }
    Err(CommandError {
        command: command_line(program, args),
        detail: failure_detail(&out),
    })
}

/// Run to completion; `true` only for a zero exit.
pub async fn succeeds(program: &str, args: &[&str]) -> bool {
    match output(program, args).await {
        Ok(out) => out.status.success(),
        Err(e) => {
            trace!(error = %e, "command did not run");
            false
        }
    }
}

/// Run with all standard streams on `/dev/null` and wait at most `timeout`.
///
/// For daemons that fork and return: a background child that keeps
/// inherited descriptors open cannot stall the caller.
pub async fn run_detached(program: &str, args: &[&str], timeout: Duration) -> Result<(), CommandError> {
    let line = command_line(program, args);
    trace!(command = %line, "exec detached");
    let failed = |detail: String| CommandError {
        command: line.clone(),
        detail,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| failed(e.to_string()))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(failed(format!("exited with {status}"))),
        Ok(Err(e)) => Err(failed(format!("wait: {e}"))),
        Err(_) => Err(failed(format!("still running after {timeout:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_args() {
        assert_eq!(
            command_line("nginx", &["-t", "-c", "/etc/nginx/nginx.conf"]),
            "nginx -t -c /etc/nginx/nginx.conf"
        );
    }

    #[tokio::test]
    async fn exec_returns_trimmed_stdout() {
        let output = exec("echo", &["hello"]).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn exec_error_contains_stderr() {
        let err = exec("sh", &["-c", "echo oops >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(err.detail.contains("oops"), "detail was: {}", err.detail);
    }

    #[tokio::test]
    async fn exec_error_falls_back_to_stdout() {
        let err = exec("sh", &["-c", "echo on-stdout; exit 3"])
            .await
            .unwrap_err();
        assert_eq!(err.detail, "on-stdout");
    }

    #[tokio::test]
    async fn exec_missing_binary_is_error() {
        let err = exec("/nonexistent/definitely-not-here", &[])
            .await
            .unwrap_err();
        assert!(err.command.contains("definitely-not-here"));
    }

    #[tokio::test]
    async fn silent_failure_reports_status() {
        let err = exec("false", &[]).await.unwrap_err();
        assert!(err.detail.starts_with("exited with"), "detail was: {}", err.detail);
    }

    #[tokio::test]
    async fn detached_run_ignores_inherited_descriptors() {
        let start = std::time::Instant::now();
        run_detached("sh", &["-c", "sleep 30 & exit 0"], Duration::from_secs(10))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn detached_run_is_bounded() {
        let start = std::time::Instant::now();
        let err = run_detached("sleep", &["30"], Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.detail.contains("still running"), "detail was: {}", err.detail);
        assert!(start.elapsed() < Duration::from_secs(5));

        let err = run_detached("false", &[], Duration::from_secs(5)).await.unwrap_err();
        assert!(err.detail.starts_with("exited with"));
    }

    #[tokio::test]
    async fn succeeds_reports_exit_status() {
        assert!(succeeds("true", &[]).await);
        assert!(!succeeds("false", &[]).await);
        assert!(!succeeds("/nonexistent/definitely-not-here", &[]).await);
    }
}
