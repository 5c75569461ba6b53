use std::sync::Arc;

use actlocal_core::project::ProjectStore;
use actlocal_core::registry::RunRegistry;
use actlocal_events::Broadcaster;

use crate::config::ServerConfig;
use crate::engine::{BackendSet, DispatchSettings, Dispatcher};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Daemon configuration (token, bind address, limits).
    pub config: Arc<ServerConfig>,
    /// All runs of this daemon process.
    pub registry: Arc<RunRegistry>,
    /// Event fan-out to WebSocket subscribers.
    pub broadcaster: Arc<Broadcaster>,
    /// Registered projects and the active selection.
    pub projects: Arc<dyn ProjectStore>,
    /// Creates runs and drives them through the backends.
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Wire up registry, broadcaster and dispatcher around the given
    /// project store and backends.
    pub fn new(config: ServerConfig, projects: Arc<dyn ProjectStore>, backends: BackendSet) -> Self {
        let registry = Arc::new(RunRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            Arc::clone(&projects),
            backends,
            DispatchSettings {
                default_image: config.default_image.clone(),
                max_concurrent_runs: config.max_concurrent_runs,
            },
        ));

        Self {
            config: Arc::new(config),
            registry,
            broadcaster,
            projects,
            dispatcher,
        }
    }
}
