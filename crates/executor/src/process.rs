//! Shared child-process helpers for the backends that shell out.
//!
//! [`stream_command`] forwards combined stdout/stderr to a sink while the
//! process runs; [`capture_command`] collects stdout for short auxiliary
//! calls (`git remote`, `gh run list`, ...).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::sink::OutputSink;

/// How long the pipes may stay open after the child exits. A background
/// grandchild can inherit them and keep them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawn `cmd`, stream its output line by line into `sink` and return its
/// exit code (`-1` if it was killed by a signal).
///
/// A missing executable maps to [`BackendError::ToolMissing`]. Cancellation
/// kills the child and returns [`BackendError::Cancelled`]. Output still
/// pending when the child exits is read for at most [`DRAIN_TIMEOUT`].
pub async fn stream_command(
    mut cmd: Command,
    tool: &'static str,
    sink: &OutputSink,
    cancel: &CancellationToken,
) -> Result<i32, BackendError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| spawn_error(tool, e))?;

    let stdout_task = tokio::spawn(forward_lines(child.stdout.take(), sink.clone()));
    let stderr_task = tokio::spawn(forward_lines(child.stderr.take(), sink.clone()));
    let readers = [stdout_task.abort_handle(), stderr_task.abort_handle()];

    let status = tokio::select! {
        status = child.wait() => Some(status?),
        _ = cancel.cancelled() => None,
    };
    let Some(status) = status else {
        let _ = child.kill().await;
        readers.iter().for_each(|reader| reader.abort());
        tracing::info!(tool, "Child process killed on cancellation");
        return Err(BackendError::Cancelled);
    };

    // Drain whatever is still buffered in the pipes.
    let drain = async {
        let _ = stdout_task.await;
        let _ = stderr_task.await;
    };
    tokio::select! {
        drained = tokio::time::timeout(DRAIN_TIMEOUT, drain) => {
            if drained.is_err() {
                tracing::warn!(tool, "Output pipes still open after exit, dropping the rest");
            }
        }
        _ = cancel.cancelled() => {
            readers.iter().for_each(|reader| reader.abort());
            return Err(BackendError::Cancelled);
        }
    }
    readers.iter().for_each(|reader| reader.abort());

    Ok(status.code().unwrap_or(-1))
}

/// Run `cmd` to completion and return its trimmed stdout.
///
/// A nonzero exit becomes [`BackendError::Command`] carrying stderr.
pub async fn capture_command(mut cmd: Command, tool: &'static str) -> Result<String, BackendError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let output = cmd.output().await.map_err(|e| spawn_error(tool, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(BackendError::Command { tool, message });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn spawn_error(tool: &'static str, err: std::io::Error) -> BackendError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BackendError::ToolMissing { tool }
    } else {
        BackendError::Io(err)
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, sink: OutputSink) {
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => sink.write(String::from_utf8_lossy(&buf).into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
        let mut out = String::new();
        while let Ok(chunk) = rx.try_recv() {
            out.push_str(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn streams_stdout_and_stderr() {
        let (sink, rx) = OutputSink::channel();
        let code = stream_command(
            sh("echo out; echo err 1>&2"),
            "sh",
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        let output = collect(rx);
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[tokio::test]
    async fn reports_exit_code_verbatim() {
        let (sink, _rx) = OutputSink::channel();
        let code = stream_command(sh("exit 7"), "sh", &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn missing_binary_is_tool_missing() {
        let (sink, _rx) = OutputSink::channel();
        let result = stream_command(
            Command::new("actlocal-definitely-not-installed"),
            "act",
            &sink,
            &CancellationToken::new(),
        )
        .await;
        assert_matches!(result, Err(BackendError::ToolMissing { tool: "act" }));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let (sink, _rx) = OutputSink::channel();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = stream_command(sh("sleep 30"), "sh", &sink, &cancel).await;
        assert_matches!(result, Err(BackendError::Cancelled));
    }

    #[tokio::test]
    async fn background_grandchild_does_not_hold_the_run_open() {
        let (sink, rx) = OutputSink::channel();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            stream_command(
                sh("sleep 20 & echo started"),
                "sh",
                &sink,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("stream_command returned within the drain bound");

        assert_eq!(result.unwrap(), 0);
        assert!(collect(rx).contains("started"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_post_exit_drain() {
        let (sink, _rx) = OutputSink::channel();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_millis(1500),
            stream_command(sh("sleep 20 & echo started"), "sh", &sink, &cancel),
        )
        .await
        .expect("cancellation is honoured before the drain bound");
        assert_matches!(result, Err(BackendError::Cancelled));
    }

    #[tokio::test]
    async fn capture_returns_stdout_or_stderr_on_failure() {
        assert_eq!(capture_command(sh("echo ' hi '"), "sh").await.unwrap(), "hi");
        assert_matches!(
            capture_command(sh("echo nope 1>&2; exit 1"), "sh").await,
            Err(BackendError::Command { tool: "sh", message }) if message == "nope"
        );
    }
}
