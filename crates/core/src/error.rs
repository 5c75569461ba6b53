#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("no active project; select a project or pass projectId")]
    NoActiveProject,

    #[error("job '{job_id}' not found in workflow {workflow}")]
    JobNotFound { job_id: String, workflow: String },

    #[error("Invalid workflow: {0}")]
    Workflow(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
