use axum::routing::{get, post};
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Routes mounted at `/runs`.
///
/// ```text
/// GET  /             -> list_runs
/// POST /             -> create_run
/// GET  /{id}         -> get_run
/// POST /{id}/cancel  -> cancel_run
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(runs::list_runs).post(runs::create_run))
        .route("/{id}", get(runs::get_run))
        .route("/{id}/cancel", post(runs::cancel_run))
}
