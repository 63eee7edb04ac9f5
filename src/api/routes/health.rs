//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Reports whether the status store answers
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let (status, storage) = match state.store.health_check().await {
        Ok(health) if health.healthy => ("ok", health.message),
        Ok(health) => ("degraded", health.message),
        Err(e) => ("degraded", e.to_string()),
    };

    let now = Utc::now();
    Json(HealthResponse {
        status: status.to_string(),
        timestamp: now.to_rfc3339(),
        storage,
        uptime_seconds: (now - state.started_at).num_seconds(),
    })
}
