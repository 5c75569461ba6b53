#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use actlocal_api::config::ServerConfig;
use actlocal_api::engine::BackendSet;
use actlocal_api::router::build_app_router;
use actlocal_api::state::AppState;
use actlocal_core::project::{InMemoryProjectStore, Project};
use actlocal_executor::process::stream_command;
use actlocal_executor::steps::run_steps;
use actlocal_executor::{
    BackendError, EngineEndpoint, ExecutionBackend, OutputSink, WorkUnit,
};

pub const TOKEN: &str = "test-token";
pub const DASHBOARD: &str = "http://localhost:5173";

/// Build a test `ServerConfig` with safe defaults and a fixed token.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 7421,
        token: TOKEN.to_string(),
        token_generated: false,
        dashboard_origin: DASHBOARD.to_string(),
        cors_origins: Vec::new(),
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_concurrent_runs: 4,
        default_image: "ubuntu:latest".to_string(),
        projects: Vec::new(),
        docker: EngineEndpoint::default(),
    }
}

/// Executes builtin steps with the host shell instead of a container, using
/// the same step sequencing as the container backend.
pub struct ShellStepBackend;

#[async_trait]
impl ExecutionBackend for ShellStepBackend {
    fn name(&self) -> &'static str {
        "shell"
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
        let workdir = job.workdir.clone();
        run_steps(&job.steps, &sink, &cancel, |command, env| {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command).envs(env);
            if let Some(dir) = &workdir {
                cmd.current_dir(dir);
            }
            let sink = sink.clone();
            let cancel = cancel.clone();
            async move { stream_command(cmd, "sh", &sink, &cancel).await }
        })
        .await
    }
}

/// Always fails as if the container engine were down.
pub struct FailingBackend;

#[async_trait]
impl ExecutionBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn execute(
        &self,
        _work: WorkUnit,
        sink: Option<OutputSink>,
        _cancel: CancellationToken,
    ) -> Result<i32, BackendError> {
        OutputSink::or_stdout(sink).line("connecting to engine");
        Err(BackendError::EngineUnreachable {
            host: "unix:///var/run/docker.sock".into(),
            reason: "connection refused".into(),
        })
    }
}

/// Shell steps for `builtin`, failures for the delegated engines.
pub fn test_backends() -> BackendSet {
    BackendSet {
        builtin: Arc::new(ShellStepBackend),
        act: Arc::new(FailingBackend),
        github: Arc::new(FailingBackend),
    }
}

/// Application state with no registered projects.
pub fn test_state() -> AppState {
    test_state_with(test_config(), InMemoryProjectStore::default())
}

pub fn test_state_with(config: ServerConfig, projects: InMemoryProjectStore) -> AppState {
    AppState::new(config, Arc::new(projects), test_backends())
}

/// Build the full application router with all middleware layers, exactly
/// as the daemon does.
pub fn build_test_app(state: AppState) -> Router {
    let config = state.config.as_ref().clone();
    build_app_router(state, &config)
}

/// A project root containing `.github/workflows/<name>` with `body`.
pub fn project_with_workflow(name: &str, body: &str) -> (tempfile::TempDir, Project) {
    let dir = tempfile::tempdir().unwrap();
    let workflows = dir.path().join(".github/workflows");
    std::fs::create_dir_all(&workflows).unwrap();
    std::fs::write(workflows.join(name), body).unwrap();
    let project = Project::with_id("demo", dir.path());
    (dir, project)
}

pub fn write_file(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Authenticated GET.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::get(uri)
        .header("x-actlocal-token", TOKEN)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Authenticated POST with a JSON body.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::post(uri)
        .header("x-actlocal-token", TOKEN)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET /runs/{id}` until the run reaches a terminal state.
pub async fn wait_for_terminal(app: &Router, id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let detail = body_json(get(app.clone(), &format!("/runs/{id}")).await).await;
        let status = detail["run"]["status"].as_str().unwrap_or_default().to_string();
        if status == "success" || status == "failed" {
            return detail;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run {id} did not finish in time");
}
