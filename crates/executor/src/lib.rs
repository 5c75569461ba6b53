//! Execution backends that turn a unit of work into streamed output and an
//! exit code.
//!
//! * [`container::ContainerBackend`] -- steps executed in an ephemeral
//!   container through the Docker engine API.
//! * [`act::LocalRunnerBackend`] -- the external `act` runner.
//! * [`github::HostedBackend`] -- hosted runners driven through `gh`.

pub mod act;
pub mod backend;
pub mod container;
pub mod error;
pub mod github;
pub mod process;
pub mod sink;
pub mod steps;

pub use backend::{
    ContainerJob, EngineEndpoint, ExecutionBackend, HostedJob, LocalRunnerJob, WorkUnit,
};
pub use error::BackendError;
pub use sink::OutputSink;
