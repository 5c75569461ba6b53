//! Run dispatch: request validation and background execution.

pub mod dispatcher;
pub mod plan;

pub use dispatcher::{BackendSet, DispatchSettings, Dispatcher};
pub use plan::{plan_run, CreateRunRequest, PlannedRun};
