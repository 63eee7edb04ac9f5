//! Event ingestion endpoint

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::debug;

use crate::MonitoringEvent;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::EventAccepted,
};

/// POST /api/v1/events
///
/// Publishes the event and returns 202 without waiting for it to be applied
pub async fn ingest_event(
    State(state): State<ApiState>,
    payload: Result<Json<MonitoringEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    let Json(event) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    state.producer.publish(&event).await?;
    debug!(server_id = %event.server_id, "event accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            accepted: true,
            server_id: event.server_id,
        }),
    ))
}
