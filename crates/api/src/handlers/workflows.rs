use actlocal_core::workflow::discover_workflows;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::AppResult;
use crate::middleware::auth::DaemonAuth;
use crate::state::AppState;

/// GET /workflows
///
/// Workflow files of the active project; empty when none is active.
pub async fn list_workflows(
    _auth: DaemonAuth,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let workflows = match state.projects.active() {
        Some(project) => discover_workflows(project.root())?,
        None => Vec::new(),
    };
    Ok(Json(json!({ "workflows": workflows })))
}
