//! Handlers for the `/projects` resource.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::middleware::auth::DaemonAuth;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectProjectRequest {
    pub project_id: Option<String>,
}

/// GET /projects
pub async fn list_projects(_auth: DaemonAuth, State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "projects": state.projects.list(),
        "activeProjectId": state.projects.active().map(|p| p.id),
    }))
}

/// POST /projects/select
///
/// Make a registered project the active one. A missing or unknown
/// `projectId` answers 400 with `{ "ok": false, "error": ... }`.
pub async fn select_project(
    _auth: DaemonAuth,
    State(state): State<AppState>,
    Json(input): Json<SelectProjectRequest>,
) -> Response {
    let Some(project_id) = input.project_id.filter(|id| !id.trim().is_empty()) else {
        return rejected("projectId is required");
    };

    match state.projects.select(&project_id) {
        Ok(project) => {
            tracing::info!(project_id = %project.id, "Active project selected");
            Json(json!({ "ok": true, "activeProjectId": project.id })).into_response()
        }
        Err(e) => rejected(&e.to_string()),
    }
}

fn rejected(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": error })),
    )
        .into_response()
}
