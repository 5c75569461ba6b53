//! The execution-backend capability and the units of work it accepts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use actlocal_core::workflow::Step;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::sink::OutputSink;

/// Something that can execute a unit of work and report its exit code.
///
/// Implementations stream output to `sink` (stdout when `None`) while the
/// work runs, and return exactly one outcome. When `cancel` fires they stop
/// the work, run their cleanup and return [`BackendError::Cancelled`].
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        work: WorkUnit,
        sink: Option<OutputSink>,
        cancel: CancellationToken,
    ) -> Result<i32, BackendError>;
}

/// Backend-specific description of what to run.
#[derive(Debug, Clone)]
pub enum WorkUnit {
    Container(ContainerJob),
    LocalRunner(LocalRunnerJob),
    Hosted(HostedJob),
}

/// Steps to execute one by one inside an ephemeral container.
#[derive(Debug, Clone)]
pub struct ContainerJob {
    pub image: String,
    pub steps: Vec<Step>,
    /// Host directory bind-mounted as the container's working directory.
    pub workdir: Option<PathBuf>,
}

/// A workflow run through the external `act` tool.
#[derive(Debug, Clone, Default)]
pub struct LocalRunnerJob {
    pub project_root: PathBuf,
    /// Workflow file, relative to `project_root` or absolute.
    pub workflow_path: String,
    pub job_id: Option<String>,
    pub event_name: Option<String>,
    pub event_path: Option<String>,
    pub secret_file: Option<String>,
    pub vars_file: Option<String>,
    /// `label=image` platform mappings.
    pub platforms: Vec<String>,
}

/// A workflow dispatched to hosted runners through `gh`.
#[derive(Debug, Clone, Default)]
pub struct HostedJob {
    pub project_root: PathBuf,
    pub workflow_path: String,
    /// `owner/name`; detected from the `origin` remote when absent.
    pub repo: Option<String>,
    pub git_ref: Option<String>,
    pub inputs: BTreeMap<String, String>,
}

/// Location of the container engine. Empty means the local defaults
/// (including `DOCKER_HOST`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEndpoint {
    /// `unix://`, `tcp://` or `http(s)://` address of a remote engine.
    pub host: Option<String>,
    /// Directory containing `key.pem`, `cert.pem` and `ca.pem` for TLS.
    pub cert_path: Option<PathBuf>,
}

impl EngineEndpoint {
    pub fn describe(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| "the local Docker socket".to_string())
    }
}
