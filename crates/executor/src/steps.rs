//! Sequential step execution shared by the container backend.

use std::collections::BTreeMap;
use std::future::Future;

use actlocal_core::workflow::Step;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::sink::OutputSink;

/// Run `steps` in order through `exec`, which receives the shell command
/// and the step environment and returns the command's exit code.
///
/// Steps without a `run` command (action references) are skipped with a
/// notice. The first nonzero exit stops the sequence and becomes the
/// result; later steps never start.
pub async fn run_steps<F, Fut>(
    steps: &[Step],
    sink: &OutputSink,
    cancel: &CancellationToken,
    mut exec: F,
) -> Result<i32, BackendError>
where
    F: FnMut(String, BTreeMap<String, String>) -> Fut,
    Fut: Future<Output = Result<i32, BackendError>>,
{
    let total = steps.len();
    for (index, step) in steps.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let label = step.label(index);
        let Some(command) = step.run.as_deref().filter(|c| !c.trim().is_empty()) else {
            sink.line(format!(
                "skipping step '{label}' (uses: {})",
                step.uses.as_deref().unwrap_or("-")
            ));
            continue;
        };

        sink.line(format!("==> [{}/{total}] {label}", index + 1));
        let code = exec(command.to_string(), step.env.clone()).await?;
        if code != 0 {
            sink.line(format!("step '{label}' failed with exit code {code}"));
            return Ok(code);
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;

    use super::*;

    fn recording_exec(
        log: Arc<Mutex<Vec<String>>>,
        codes: Vec<i32>,
    ) -> impl FnMut(String, BTreeMap<String, String>) -> std::future::Ready<Result<i32, BackendError>>
    {
        let mut codes = codes.into_iter();
        move |cmd, _env| {
            log.lock().unwrap().push(cmd);
            std::future::ready(Ok(codes.next().unwrap_or(0)))
        }
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![Step::run("echo a"), Step::run("echo b")];
        let (sink, _rx) = OutputSink::channel();

        let code = run_steps(
            &steps,
            &sink,
            &CancellationToken::new(),
            recording_exec(seen.clone(), vec![0, 0]),
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(*seen.lock().unwrap(), vec!["echo a", "echo b"]);
    }

    #[tokio::test]
    async fn nonzero_exit_stops_the_sequence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let steps = vec![Step::run("exit 3"), Step::run("echo never")];
        let (sink, _rx) = OutputSink::channel();

        let code = run_steps(
            &steps,
            &sink,
            &CancellationToken::new(),
            recording_exec(seen.clone(), vec![3]),
        )
        .await
        .unwrap();

        assert_eq!(code, 3);
        assert_eq!(*seen.lock().unwrap(), vec!["exit 3"]);
    }

    #[tokio::test]
    async fn uses_steps_are_skipped_with_notice() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let checkout = Step {
            uses: Some("actions/checkout@v4".into()),
            ..Default::default()
        };
        let steps = vec![checkout, Step::run("make")];
        let (sink, mut rx) = OutputSink::channel();

        run_steps(
            &steps,
            &sink,
            &CancellationToken::new(),
            recording_exec(seen.clone(), vec![0]),
        )
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["make"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            "skipping step 'actions/checkout@v4' (uses: actions/checkout@v4)\n"
        );
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sink, _rx) = OutputSink::channel();

        let result = run_steps(
            &[Step::run("true")],
            &sink,
            &cancel,
            recording_exec(Arc::default(), vec![]),
        )
        .await;
        assert_matches!(result, Err(BackendError::Cancelled));
    }
}
