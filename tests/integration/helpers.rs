//! Helper functions for integration tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use server_liveness::{
    ServerStatus,
    config::{Config, ServerConfig, StorageConfig},
    storage::{
        HealthStatus, HeartbeatOutcome, MemoryStore, MetricSample, ServerRecord,
        ServerRegistration, StatusStore, StatusTransition, StorageError, StorageResult,
    },
};

pub fn base_time() -> DateTime<Utc> {
    "2025-03-14T12:00:00Z".parse().unwrap()
}

pub fn server(server_id: &str, interval: u32) -> ServerConfig {
    ServerConfig {
        server_id: server_id.to_string(),
        address: format!("{server_id}.internal:22"),
        interval,
    }
}

pub fn registration(server_id: &str, interval_seconds: u32) -> ServerRegistration {
    ServerRegistration {
        server_id: server_id.to_string(),
        address: String::new(),
        interval_seconds,
    }
}

/// Default configuration with an in-memory store and the given servers
pub fn test_config(servers: Vec<ServerConfig>) -> Config {
    let mut config = Config::default();
    config.servers = servers;
    config.storage = StorageConfig::None;
    config
}

/// Poll the store until `server_id` reaches `expected`, for up to 100s
pub async fn wait_for_status(
    store: &dyn StatusStore,
    server_id: &str,
    expected: ServerStatus,
) -> bool {
    for _ in 0..200 {
        if let Ok(Some(record)) = store.get_server(server_id).await
            && record.status == expected
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}

/// Poll `condition` every 10ms, for up to 5s
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A MemoryStore whose calls can be made to fail on demand
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_heartbeats: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_demote: AtomicBool,

    /// Servers whose demotion fails while the rest go through
    pub fail_demote_for: Mutex<HashSet<String>>,

    /// Delay added to every `list_servers` call
    pub list_delay_ms: AtomicU64,
}

impl FailingStore {
    fn check(flag: &AtomicBool, operation: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed(format!(
                "{operation}: connection refused"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for FailingStore {
    async fn register_server(&self, registration: ServerRegistration) -> StorageResult<()> {
        self.inner.register_server(registration).await
    }

    async fn get_server(&self, server_id: &str) -> StorageResult<Option<ServerRecord>> {
        self.inner.get_server(server_id).await
    }

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Self::check(&self.fail_list, "list_servers")?;
        self.inner.list_servers().await
    }

    async fn record_heartbeat(
        &self,
        server_id: &str,
        timestamp: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> StorageResult<HeartbeatOutcome> {
        Self::check(&self.fail_heartbeats, "record_heartbeat")?;
        self.inner
            .record_heartbeat(server_id, timestamp, received_at)
            .await
    }

    async fn demote_if_stale(
        &self,
        server_id: &str,
        seen_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        Self::check(&self.fail_demote, "demote_if_stale")?;
        if self.fail_demote_for.lock().contains(server_id) {
            return Err(StorageError::ConnectionFailed(format!(
                "demote_if_stale({server_id}): connection reset"
            )));
        }
        self.inner.demote_if_stale(server_id, seen_before, now).await
    }

    async fn insert_sample(&self, sample: MetricSample) -> StorageResult<()> {
        self.inner.insert_sample(sample).await
    }

    async fn query_latest_samples(
        &self,
        server_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricSample>> {
        self.inner.query_latest_samples(server_id, limit).await
    }

    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_old_samples(before).await
    }

    async fn cleanup_old_transitions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_old_transitions(before).await
    }

    async fn transitions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<StatusTransition>> {
        self.inner.transitions_between(start, end).await
    }

    async fn last_transition_before(
        &self,
        server_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<StatusTransition>> {
        self.inner.last_transition_before(server_id, at).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
