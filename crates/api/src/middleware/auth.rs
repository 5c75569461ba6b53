//! Shared-secret authentication extractor for Axum handlers.

use actlocal_core::error::CoreError;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the daemon token.
pub const TOKEN_HEADER: &str = "x-actlocal-token";

/// Proof that the request presented the daemon token.
///
/// Accepted locations, in order: the `x-actlocal-token` header, an
/// `Authorization: Bearer <token>` header, and for the `/ws` upgrade only
/// a `token` query parameter (browsers cannot set headers on WebSocket
/// handshakes). As an extractor it runs before any upgrade is accepted.
///
/// ```ignore
/// async fn my_handler(_auth: DaemonAuth) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DaemonAuth;

impl FromRequestParts<AppState> for DaemonAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = presented_token(parts).ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized("Missing daemon token".into()))
        })?;

        if !tokens_match(&presented, &state.config.token) {
            tracing::warn!(path = %parts.uri.path(), "Rejected request with invalid token");
            return Err(AppError::Core(CoreError::Unauthorized(
                "Invalid daemon token".into(),
            )));
        }
        Ok(DaemonAuth)
    }
}

#[derive(Debug, Deserialize)]
struct WsTokenQuery {
    token: Option<String>,
}

fn presented_token(parts: &Parts) -> Option<String> {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(token) = header(TOKEN_HEADER) {
        return Some(token.to_string());
    }
    if let Some(token) = header("authorization").and_then(|v| v.strip_prefix("Bearer ")) {
        return Some(token.trim().to_string());
    }
    if parts.uri.path() == "/ws" {
        return Query::<WsTokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.token)
            .filter(|token| !token.is_empty());
    }
    None
}

/// Compare fixed-size digests so the comparison time does not depend on
/// how much of the secret a caller guessed.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
