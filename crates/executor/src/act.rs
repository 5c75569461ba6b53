//! `act` engine: delegate the whole workflow to the external local runner.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::backend::{EngineEndpoint, ExecutionBackend, LocalRunnerJob, WorkUnit};
use crate::error::BackendError;
use crate::process::stream_command;
use crate::sink::OutputSink;

pub struct LocalRunnerBackend {
    program: PathBuf,
    endpoint: EngineEndpoint,
}

impl LocalRunnerBackend {
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self::with_program("act", endpoint)
    }

    /// Use a specific `act` executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>, endpoint: EngineEndpoint) -> Self {
        Self {
            program: program.into(),
            endpoint,
        }
    }

    fn command(&self, job: &LocalRunnerJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(act_args(job)).current_dir(&job.project_root);
        if let Some(host) = &self.endpoint.host {
            cmd.env("DOCKER_HOST", host);
        }
        if let Some(certs) = &self.endpoint.cert_path {
            cmd.env("DOCKER_CERT_PATH", certs).env("DOCKER_TLS_VERIFY", "1");
        }
        cmd
    }
}

#[async_trait]
impl ExecutionBackend for LocalRunnerBackend {
    fn name(&self) -> &'static str {
        "act"
    }

    async fn execute(
        &self,
        work: WorkUnit,
        sink: Option<OutputSink>,
        cancel: CancellationToken,
    ) -> Result<i32, BackendError> {
        let WorkUnit::LocalRunner(job) = work else {
            return Err(BackendError::UnsupportedWork { backend: self.name() });
        };
        let sink = OutputSink::or_stdout(sink);

        sink.line(format!("$ act {}", act_args(&job).join(" ")));
        tracing::debug!(
            workflow = %job.workflow_path,
            root = %job.project_root.display(),
            "Starting act"
        );
        stream_command(self.command(&job), "act", &sink, &cancel).await
    }
}

/// Command-line arguments for one `act` invocation.
pub fn act_args(job: &LocalRunnerJob) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(event) = &job.event_name {
        args.push(event.clone());
    }
    args.push("-W".to_string());
    args.push(job.workflow_path.clone());

    let flags = [
        ("-j", &job.job_id),
        ("-e", &job.event_path),
        ("--secret-file", &job.secret_file),
        ("--var-file", &job.vars_file),
    ];
    for (flag, value) in flags {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }
    for platform in &job.platforms {
        args.push("-P".to_string());
        args.push(platform.clone());
    }
    args
}
