//! Status Store records
//!
//! ## Tables
//!
//! - `servers`: one row per registered server, holding its heartbeat
//!   interval, current status and the newest heartbeat seen so far
//! - `metric_samples`: resource snapshots keyed by `(server_id, timestamp)`,
//!   so a re-delivered event overwrites its own sample instead of adding one
//! - `status_transitions`: append-only log of status changes, written in the
//!   same atomic step as the change itself (feeds the daily uptime report)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{MonitoringEvent, ServerStatus};

/// Current liveness state of one registered server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Unique server identifier
    pub server_id: String,

    /// Network address (informational, never contacted by this subsystem)
    pub address: String,

    /// Configured heartbeat period in seconds (> 0)
    pub interval_seconds: u32,

    pub status: ServerStatus,

    /// Newest heartbeat timestamp observed (None until the first heartbeat)
    pub last_seen: Option<DateTime<Utc>>,

    /// When `status` last changed
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl ServerRecord {
    /// A freshly registered server that has never reported in
    pub fn new(registration: &ServerRegistration) -> Self {
        Self {
            server_id: registration.server_id.clone(),
            address: registration.address.clone(),
            interval_seconds: registration.interval_seconds,
            status: ServerStatus::Undefined,
            last_seen: None,
            status_changed_at: None,
        }
    }

    /// `interval_seconds × grace_multiplier`
    pub fn liveness_window(&self, grace_multiplier: f64) -> Duration {
        let millis = (self.interval_seconds as f64 * grace_multiplier * 1000.0).round();
        Duration::milliseconds(millis as i64)
    }

    /// True when the newest heartbeat is older than the liveness window
    ///
    /// A server that never reported in is not stale; it stays UNDEFINED.
    pub fn is_stale(&self, now: DateTime<Utc>, grace_multiplier: f64) -> bool {
        match self.last_seen {
            Some(last_seen) => now - last_seen > self.liveness_window(grace_multiplier),
            None => false,
        }
    }
}

/// Identity and heartbeat interval supplied by the registration flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRegistration {
    pub server_id: String,
    pub address: String,
    pub interval_seconds: u32,
}

/// Result of applying one heartbeat to a record
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatOutcome {
    /// Status before the heartbeat was applied
    pub previous_status: ServerStatus,

    /// The record after the heartbeat was applied
    pub record: ServerRecord,
}

impl HeartbeatOutcome {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.record.status
    }
}

/// One resource snapshot for a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu: Option<f64>,
    pub ram: Option<f64>,
    pub disk: Option<f64>,
}

impl MetricSample {
    pub fn from_event(event: &MonitoringEvent) -> Self {
        Self {
            server_id: event.server_id.clone(),
            timestamp: event.timestamp,
            cpu: event.cpu,
            ram: event.ram,
            disk: event.disk,
        }
    }
}

/// A recorded status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub server_id: String,
    pub from: ServerStatus,
    pub to: ServerStatus,
    pub at: DateTime<Utc>,
}
