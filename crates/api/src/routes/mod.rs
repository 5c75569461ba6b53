pub mod projects;
pub mod runs;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the daemon route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                       WebSocket event stream
/// /status                   daemon status (GET)
///
/// /runs                     list, create
/// /runs/{id}                run with log
/// /runs/{id}/cancel         request cancellation (POST)
///
/// /projects                 list with active selection
/// /projects/select          select active project (POST)
///
/// /workflows                workflows of the active project
/// ```
///
/// Every route requires the daemon token.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/status", get(handlers::status::status))
        .route(
            "/workflows",
            get(handlers::workflows::list_workflows),
        )
        .nest("/runs", runs::router())
        .nest("/projects", projects::router())
}
