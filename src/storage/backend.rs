//! Status Store trait definition
//!
//! This module defines the `StatusStore` trait that all storage
//! implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    HeartbeatOutcome, MetricSample, ServerRecord, ServerRegistration, StatusTransition,
};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Durable record of every server's identity, interval and liveness status
///
/// Shared by the consumer handlers, the monitoring worker, the report task
/// and the read-only API. Implementations must be `Send + Sync`.
///
/// ## Concurrency
///
/// There is no store-wide lock. Each mutation is atomic per record
/// (a per-record mutex in memory, a single conditional `UPDATE` in SQL), so
/// writers to different servers never contend with each other.
///
/// ## Monotonicity
///
/// `last_seen` only ever moves forward: `record_heartbeat` stores
/// `max(existing, timestamp)`. Re-delivered and out-of-order heartbeats are
/// therefore harmless.
///
/// Transitions and `status_changed_at` are stamped with the time the store
/// applied the change (`received_at` / `now`), never with an event
/// timestamp, so the transition log stays ordered.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create a record, or refresh address/interval of an existing one
    ///
    /// Status and `last_seen` of an existing record are left untouched.
    async fn register_server(&self, registration: ServerRegistration) -> StorageResult<()>;

    /// Fetch a single record
    async fn get_server(&self, server_id: &str) -> StorageResult<Option<ServerRecord>>;

    /// Fetch every record, in no particular order
    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>>;

    /// Apply a heartbeat: `last_seen = max(last_seen, timestamp)`, status ON
    ///
    /// A status change is logged as a transition at `received_at` in the
    /// same atomic step. Fails with `StorageError::UnknownServer` if no
    /// record exists.
    async fn record_heartbeat(
        &self,
        server_id: &str,
        timestamp: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> StorageResult<HeartbeatOutcome>;

    /// Demote ON → OFF iff `last_seen < seen_before`
    ///
    /// The check and the write happen atomically, so a heartbeat landing
    /// between the caller's read and this call wins. Returns whether the
    /// record was demoted.
    async fn demote_if_stale(
        &self,
        server_id: &str,
        seen_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Upsert a metric sample keyed by `(server_id, timestamp)`
    async fn insert_sample(&self, sample: MetricSample) -> StorageResult<()>;

    /// The N most recent samples for a server, oldest first
    async fn query_latest_samples(
        &self,
        server_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricSample>>;

    /// Delete samples older than `before`, returning how many were removed
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Delete transitions older than `before`, returning how many were removed
    ///
    /// The newest transition of each server before the cutoff survives, so
    /// `last_transition_before` can still tell the status at the cutoff.
    async fn cleanup_old_transitions(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Transitions with `start <= at < end`, ordered by time
    async fn transitions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<StatusTransition>>;

    /// The newest transition of a server strictly before `at`
    async fn last_transition_before(
        &self,
        server_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<StatusTransition>>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
