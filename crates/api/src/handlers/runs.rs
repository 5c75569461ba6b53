//! Handlers for the `/runs` resource.
//!
//! All endpoints require the daemon token via [`DaemonAuth`].

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::engine::CreateRunRequest;
use crate::error::AppResult;
use crate::middleware::auth::DaemonAuth;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /runs
///
/// Validate the request, record a queued run and start it in the
/// background. Returns 201 with the new run id.
pub async fn create_run(
    _auth: DaemonAuth,
    State(state): State<AppState>,
    Json(input): Json<CreateRunRequest>,
) -> AppResult<impl IntoResponse> {
    let id = state.dispatcher.create_run(input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /runs
///
/// All runs, newest first, without logs.
pub async fn list_runs(_auth: DaemonAuth, State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "runs": state.registry.list() }))
}

/// GET /runs/{id}
///
/// A run with its current log. Unknown ids answer 404 with
/// `{ "error": "not_found" }`.
pub async fn get_run(
    _auth: DaemonAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get(&id) {
        Some(detail) => Json(detail).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /runs/{id}/cancel
///
/// Request cancellation. The run still finishes through the normal
/// lifecycle and ends `failed`.
pub async fn cancel_run(
    _auth: DaemonAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.dispatcher.cancel_run(&id)?;
    Ok(Json(json!({ "ok": true })))
}
