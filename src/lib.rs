pub mod actors;
pub mod api;
pub mod bus;
pub mod clock;
pub mod config;
pub mod handlers;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod util;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness status of a monitored server, surfaced verbatim to API consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerStatus {
    On,
    Off,
    Undefined,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::On => "ON",
            ServerStatus::Off => "OFF",
            ServerStatus::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(ServerStatus::On),
            "OFF" => Ok(ServerStatus::Off),
            "UNDEFINED" => Ok(ServerStatus::Undefined),
            other => Err(format!("unknown server status '{other}'")),
        }
    }
}

/// A heartbeat, optionally carrying a resource snapshot
///
/// This is the JSON body ingestion publishes onto the bus:
/// `{server_id, timestamp, cpu?, ram?, disk?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    pub server_id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<f64>,
}

/// Rejected event payload (empty id, negative or non-finite metric)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid monitoring event: {0}")]
pub struct InvalidEvent(pub String);

impl MonitoringEvent {
    /// A bare heartbeat without metrics
    pub fn heartbeat(server_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            server_id: server_id.into(),
            timestamp,
            cpu: None,
            ram: None,
            disk: None,
        }
    }

    pub fn with_metrics(mut self, cpu: f64, ram: f64, disk: f64) -> Self {
        self.cpu = Some(cpu);
        self.ram = Some(ram);
        self.disk = Some(disk);
        self
    }

    pub fn has_metrics(&self) -> bool {
        self.cpu.is_some() || self.ram.is_some() || self.disk.is_some()
    }

    pub fn validate(&self) -> Result<(), InvalidEvent> {
        if self.server_id.trim().is_empty() {
            return Err(InvalidEvent("server_id must not be empty".to_string()));
        }

        for (name, value) in [("cpu", self.cpu), ("ram", self.ram), ("disk", self.disk)] {
            if let Some(value) = value
                && (!value.is_finite() || value < 0.0)
            {
                return Err(InvalidEvent(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        Ok(())
    }
}
