//! API response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ServerStatus;
use crate::storage::ServerRecord;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub timestamp: String,
    pub storage: String,
    pub uptime_seconds: i64,
}

/// Status of a single server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerStatusResponse {
    pub server_id: String,
    pub status: ServerStatus,
    pub interval_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl From<ServerRecord> for ServerStatusResponse {
    fn from(record: ServerRecord) -> Self {
        Self {
            server_id: record.server_id,
            status: record.status,
            interval_seconds: record.interval_seconds,
            last_seen: record.last_seen,
            status_changed_at: record.status_changed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersResponse {
    pub servers: Vec<ServerRecord>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub accepted: bool,
    pub server_id: String,
}
