//! Builtin engine: run workflow steps inside an ephemeral container.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::backend::{ContainerJob, EngineEndpoint, ExecutionBackend, WorkUnit};
use crate::error::BackendError;
use crate::sink::OutputSink;
use crate::steps::run_steps;

/// Mount point of the project directory inside the container.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Request timeout handed to the engine client, in seconds.
const ENGINE_TIMEOUT_SECS: u64 = 120;

pub struct ContainerBackend {
    endpoint: EngineEndpoint,
}

impl ContainerBackend {
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self { endpoint }
    }

    fn connect(&self) -> Result<Docker, BackendError> {
        let unreachable = |e: bollard::errors::Error| BackendError::EngineUnreachable {
            host: self.endpoint.describe(),
            reason: e.to_string(),
        };

        match (&self.endpoint.host, &self.endpoint.cert_path) {
            (None, _) => Docker::connect_with_local_defaults(),
            (Some(host), Some(certs)) => Docker::connect_with_ssl(
                host,
                &certs.join("key.pem"),
                &certs.join("cert.pem"),
                &certs.join("ca.pem"),
                ENGINE_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            (Some(host), None) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, ENGINE_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            (Some(host), None) => {
                Docker::connect_with_http(host, ENGINE_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(unreachable)
    }

    async fn run(
        &self,
        job: ContainerJob,
        sink: &OutputSink,
        cancel: &CancellationToken,
    ) -> Result<i32, BackendError> {
        let docker = self.connect()?;
        docker
            .ping()
            .await
            .map_err(|e| BackendError::EngineUnreachable {
                host: self.endpoint.describe(),
                reason: e.to_string(),
            })?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            _ = pull_image(&docker, &job.image, sink) => {}
        }

        let container_id = create_container(&docker, &job).await?;
        tracing::info!(container_id = %container_id, image = %job.image, "Container started");

        let working_dir = job.workdir.as_ref().map(|_| WORKSPACE_DIR.to_string());
        let result = run_steps(&job.steps, sink, cancel, |command, env| {
            exec_step(&docker, &container_id, command, env, working_dir.clone(), sink, cancel)
        })
        .await;

        remove_container(&docker, &container_id).await;
        result
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &'static str {
        "builtin"
    }

    async fn execute(
        &self,
        work: WorkUnit,
        sink: Option<OutputSink>,
        cancel: CancellationToken,
    ) -> Result<i32, BackendError> {
        let WorkUnit::Container(job) = work else {
            return Err(BackendError::UnsupportedWork { backend: self.name() });
        };
        let sink = OutputSink::or_stdout(sink);
        self.run(job, &sink, &cancel).await
    }
}

/// Pull `image`, tolerating failure: a local copy may still exist.
async fn pull_image(docker: &Docker, image: &str, sink: &OutputSink) {
    sink.line(format!("pulling image {image}"));
    let pulled = docker
        .create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        )
        .try_collect::<Vec<_>>()
        .await;

    if let Err(e) = pulled {
        tracing::warn!(image, error = %e, "Image pull failed, continuing with local copy");
        sink.line(format!(
            "warning: could not pull {image} ({e}); trying a local copy"
        ));
    }
}

async fn create_container(docker: &Docker, job: &ContainerJob) -> Result<String, BackendError> {
    let name = format!("actlocal-{}", uuid::Uuid::new_v4().simple());
    let binds = job
        .workdir
        .as_ref()
        .map(|dir| vec![format!("{}:{WORKSPACE_DIR}", dir.display())]);

    let config = Config {
        image: Some(job.image.clone()),
        // Keep the container alive; steps run through exec.
        entrypoint: Some(vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]),
        working_dir: job.workdir.as_ref().map(|_| WORKSPACE_DIR.to_string()),
        host_config: Some(HostConfig {
            binds,
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.clone(),
                platform: None,
            }),
            config,
        )
        .await?;

    if let Err(e) = docker
        .start_container(&created.id, None::<StartContainerOptions<String>>)
        .await
    {
        remove_container(docker, &created.id).await;
        return Err(e.into());
    }
    Ok(created.id)
}

async fn exec_step(
    docker: &Docker,
    container_id: &str,
    command: String,
    env: BTreeMap<String, String>,
    working_dir: Option<String>,
    sink: &OutputSink,
    cancel: &CancellationToken,
) -> Result<i32, BackendError> {
    let env: Vec<String> = env.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions::<String> {
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                cmd: Some(vec!["sh".to_string(), "-c".to_string(), command]),
                env: (!env.is_empty()).then_some(env),
                working_dir,
                ..Default::default()
            },
        )
        .await?;

    if let StartExecResults::Attached { mut output, .. } = docker.start_exec(&exec.id, None).await? {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                next = output.next() => match next {
                    Some(Ok(log)) => sink.write(log_text(log)),
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }
    }

    let inspect = docker.inspect_exec(&exec.id).await?;
    Ok(inspect
        .exit_code
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(-1))
}

async fn remove_container(docker: &Docker, container_id: &str) {
    let removed = docker
        .remove_container(
            container_id,
            Some(RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            }),
        )
        .await;
    match removed {
        Ok(()) => tracing::debug!(container_id, "Container removed"),
        Err(e) => tracing::warn!(container_id, error = %e, "Failed to remove container"),
    }
}

fn log_text(log: LogOutput) -> String {
    match log {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => String::from_utf8_lossy(&message).into_owned(),
    }
}
