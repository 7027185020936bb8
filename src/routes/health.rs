//! Health check endpoints for container orchestration.

use axum::{extract::State, http::StatusCode};

use crate::state::AppState;

/// Liveness probe: the process can answer HTTP.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness probe: the database answers a trivial query.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
