//! Run dispatcher: records runs and drives them through a backend.
//!
//! Lifecycle of one run:
//!   1. Validate and resolve the request (`plan_run`).
//!   2. Create the run record (`queued`) and broadcast `run.created`.
//!   3. Spawn the run task and return the id to the caller.
//!   4. In the task: wait for an admission permit, mark `running`.
//!   5. Invoke the backend in a nested task, streaming output into the
//!      log and out as `run.log` events.
//!   6. Record the terminal state and broadcast `run.finished`.
//!
//! Every failure after step 2 ends in step 6; a run never stays `running`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actlocal_core::error::CoreError;
use actlocal_core::project::ProjectStore;
use actlocal_core::registry::RunRegistry;
use actlocal_core::run::{Engine, RunOutcome};
use actlocal_core::types::RunId;
use actlocal_events::{Broadcaster, RunEvent};
use actlocal_executor::act::LocalRunnerBackend;
use actlocal_executor::container::ContainerBackend;
use actlocal_executor::github::HostedBackend;
use actlocal_executor::{BackendError, EngineEndpoint, ExecutionBackend, OutputSink, WorkUnit};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::plan::{plan_run, CreateRunRequest};

/// One backend per engine.
#[derive(Clone)]
pub struct BackendSet {
    pub builtin: Arc<dyn ExecutionBackend>,
    pub act: Arc<dyn ExecutionBackend>,
    pub github: Arc<dyn ExecutionBackend>,
}

impl BackendSet {
    /// The production backends, talking to the given container engine.
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self {
            builtin: Arc::new(ContainerBackend::new(endpoint.clone())),
            act: Arc::new(LocalRunnerBackend::new(endpoint)),
            github: Arc::new(HostedBackend::new()),
        }
    }

    pub fn for_engine(&self, engine: Engine) -> Arc<dyn ExecutionBackend> {
        match engine {
            Engine::Builtin => Arc::clone(&self.builtin),
            Engine::Act => Arc::clone(&self.act),
            Engine::Github => Arc::clone(&self.github),
        }
    }
}

/// Tunables for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_image: String,
    /// `0` disables admission control.
    pub max_concurrent_runs: usize,
}

pub struct Dispatcher {
    registry: Arc<RunRegistry>,
    broadcaster: Arc<Broadcaster>,
    projects: Arc<dyn ProjectStore>,
    backends: BackendSet,
    default_image: String,
    limiter: Option<Arc<Semaphore>>,
    /// Cancellation handles of runs that have not finished yet.
    in_flight: Mutex<HashMap<RunId, CancellationToken>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RunRegistry>,
        broadcaster: Arc<Broadcaster>,
        projects: Arc<dyn ProjectStore>,
        backends: BackendSet,
        settings: DispatchSettings,
    ) -> Self {
        let limiter = (settings.max_concurrent_runs > 0)
            .then(|| Arc::new(Semaphore::new(settings.max_concurrent_runs)));
        Self {
            registry,
            broadcaster,
            projects,
            backends,
            default_image: settings.default_image,
            limiter,
            in_flight: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Validate `req`, record a queued run and start it in the background.
    ///
    /// Returns as soon as the run is recorded; validation failures create
    /// nothing.
    pub async fn create_run(self: &Arc<Self>, req: CreateRunRequest) -> Result<RunId, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Conflict("daemon is shutting down".into()));
        }

        let planned = plan_run(req, self.projects.as_ref(), &self.default_image)?;
        let engine = planned.spec.engine;
        let run = self.registry.create(planned.spec);
        tracing::info!(run_id = %run.id, engine = %engine, "Run created");

        self.broadcaster
            .broadcast(&RunEvent::Created { run: run.clone() })
            .await;

        let cancel = self.shutdown.child_token();
        self.in_flight().insert(run.id.clone(), cancel.clone());

        let this = Arc::clone(self);
        let run_id = run.id.clone();
        self.tasks.spawn(async move {
            this.drive(run_id, engine, planned.work, cancel).await;
        });

        Ok(run.id)
    }

    /// Request cancellation of a queued or running run.
    pub fn cancel_run(&self, id: &str) -> Result<(), CoreError> {
        let run = self.registry.summary(id).ok_or_else(|| CoreError::NotFound {
            entity: "run",
            id: id.to_string(),
        })?;
        if run.status.is_terminal() {
            return Err(CoreError::Conflict(format!("run {id} already finished")));
        }
        match self.in_flight().get(id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %id, "Run cancellation requested");
                Ok(())
            }
            None => Err(CoreError::Conflict(format!("run {id} is finishing"))),
        }
    }

    /// Number of runs that have not reached a terminal state.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Cancel every in-flight run and wait up to `timeout` for them to
    /// record their terminal state. New runs are refused afterwards.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown.cancel();
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "Run tasks still active after shutdown timeout");
        } else {
            tracing::info!("All run tasks finished");
        }
    }

    async fn drive(&self, run_id: RunId, engine: Engine, work: WorkUnit, cancel: CancellationToken) {
        let outcome = self.execute(&run_id, engine, work, &cancel).await;

        if let Some(error) = outcome.error() {
            tracing::warn!(run_id = %run_id, engine = %engine, error, "Run errored");
            self.emit_log(&run_id, format!("[actlocal] error: {error}\n"))
                .await;
        }

        match self.registry.finish(&run_id, &outcome) {
            Ok(run) => {
                tracing::info!(
                    run_id = %run_id,
                    status = %run.status,
                    exit_code = outcome.exit_code(),
                    "Run finished"
                );
                self.broadcaster
                    .broadcast(&RunEvent::Finished {
                        run,
                        error: outcome.error().map(str::to_owned),
                    })
                    .await;
            }
            Err(e) => tracing::error!(run_id = %run_id, error = %e, "Failed to record run result"),
        }

        self.in_flight().remove(&run_id);
    }

    async fn execute(
        &self,
        run_id: &str,
        engine: Engine,
        work: WorkUnit,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let admission = self.admit(cancel).await;

        match self.registry.mark_running(run_id) {
            Ok(run) => {
                self.broadcaster
                    .broadcast(&RunEvent::Updated { run })
                    .await;
            }
            Err(e) => return RunOutcome::Errored(e.to_string()),
        }

        let Ok(_permit) = admission else {
            return RunOutcome::Errored(BackendError::Cancelled.to_string());
        };

        let backend = self.backends.for_engine(engine);
        let (sink, mut output) = OutputSink::channel();
        let backend_cancel = cancel.clone();
        let invocation = tokio::spawn(async move {
            backend.execute(work, Some(sink), backend_cancel).await
        });

        // Ends once the backend has dropped every handle to the sink.
        while let Some(chunk) = output.recv().await {
            self.emit_log(run_id, chunk).await;
        }

        match invocation.await {
            Ok(Ok(code)) => RunOutcome::Exited(code),
            Ok(Err(e)) => RunOutcome::Errored(e.to_string()),
            Err(join_err) => RunOutcome::Errored(format!("backend task failed: {join_err}")),
        }
    }

    /// Wait for an admission permit. `Err` means the run was cancelled while
    /// still queued.
    async fn admit(&self, cancel: &CancellationToken) -> Result<Option<OwnedSemaphorePermit>, ()> {
        let Some(limiter) = &self.limiter else {
            return if cancel.is_cancelled() { Err(()) } else { Ok(None) };
        };
        tokio::select! {
            permit = Arc::clone(limiter).acquire_owned() => permit.map(Some).map_err(|_| ()),
            _ = cancel.cancelled() => Err(()),
        }
    }

    async fn emit_log(&self, run_id: &str, chunk: String) {
        if let Err(e) = self.registry.append_log(run_id, &chunk) {
            tracing::error!(run_id, error = %e, "Failed to append run log");
            return;
        }
        self.broadcaster
            .broadcast(&RunEvent::Log {
                id: run_id.to_string(),
                chunk,
            })
            .await;
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
