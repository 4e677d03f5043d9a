use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::state::AppState;

/// Liveness plus a queue round-trip, so a dead queue backend shows up here.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.gateway.queue_stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "queue": stats })),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": err.to_string() })),
        ),
    }
}
