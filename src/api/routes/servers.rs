//! Server status endpoints

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{ServerStatusResponse, ServersResponse},
};

/// GET /api/v1/servers
///
/// Every registered server with its last known status
pub async fn list_servers(State(state): State<ApiState>) -> ApiResult<Json<ServersResponse>> {
    let mut servers = state.store.list_servers().await?;
    servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));

    Ok(Json(ServersResponse {
        count: servers.len(),
        servers,
    }))
}

/// GET /api/v1/servers/:id/status
pub async fn get_server_status(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
) -> ApiResult<Json<ServerStatusResponse>> {
    state
        .store
        .get_server(&server_id)
        .await?
        .map(|record| Json(record.into()))
        .ok_or_else(|| ApiError::NotFound(format!("server '{server_id}' is not registered")))
}
