//! Read-only ops API plus event ingestion
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Store health and process uptime
//! - `GET /api/v1/servers` - Registered servers with their status
//! - `GET /api/v1/servers/:id/status` - Status of one server
//! - `POST /api/v1/events` - Publish a monitoring event onto the bus
//! - `GET /api/v1/scheduler/tasks` - Scheduled tasks
//! - `GET /api/v1/scheduler/status` - Scheduler summary
//!
//! Only `POST /api/v1/events` changes anything, and it does so through the
//! producer, never by writing to the store directly.

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{EventAccepted, HealthResponse, ServerStatusResponse, ServersResponse};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tokio_util::sync::CancellationToken;
#[cfg(feature = "api")]
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Allow any origin, for dashboards served elsewhere
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

impl ApiConfig {
    /// `None` when no bind address is configured
    pub fn from_settings(settings: &ApiSettings) -> Option<Self> {
        settings.bind.map(|bind_addr| Self {
            bind_addr,
            enable_cors: settings.enable_cors,
        })
    }
}

#[cfg(feature = "api")]
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/servers", get(routes::servers::list_servers))
        .route(
            "/api/v1/servers/:id/status",
            get(routes::servers::get_server_status),
        )
        .route("/api/v1/events", post(routes::events::ingest_event))
        .route("/api/v1/scheduler/tasks", get(routes::scheduler::list_tasks))
        .route(
            "/api/v1/scheduler/status",
            get(routes::scheduler::scheduler_status),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// Binds, serves in a background task until `shutdown` is cancelled and
/// returns the bound address (useful with port 0).
#[cfg(feature = "api")]
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        match result {
            Ok(()) => info!("API server stopped"),
            Err(e) => tracing::error!("API server error: {}", e),
        }
    });

    Ok(addr)
}
