use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::middleware::auth::DaemonAuth;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub version: &'static str,
    pub host: String,
    pub port: u16,
    /// Number of runs known to this daemon process.
    pub runs: usize,
}

/// GET /status
pub async fn status(_auth: DaemonAuth, State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        host: state.config.host.clone(),
        port: state.config.port,
        runs: state.registry.len(),
    })
}
