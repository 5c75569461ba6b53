/// Errors raised while invoking an execution backend.
///
/// A nonzero exit code is not an error; it is reported through the `Ok`
/// value of [`ExecutionBackend::execute`](crate::ExecutionBackend::execute).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The external tool the backend shells out to is not installed.
    #[error("{tool} is not installed or not on PATH")]
    ToolMissing { tool: &'static str },

    /// The container engine did not answer.
    #[error("cannot reach the container engine at {host}: {reason}. Is Docker running?")]
    EngineUnreachable { host: String, reason: String },

    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    /// An auxiliary command exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Command { tool: &'static str, message: String },

    #[error("cannot determine the GitHub repository: {0}")]
    Repository(String),

    /// The hosted run triggered by us never showed up in the run list.
    #[error("triggered workflow run not found after {attempts} attempts")]
    RunNotFound { attempts: u32 },

    #[error("{backend} backend cannot execute this kind of work")]
    UnsupportedWork { backend: &'static str },

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
