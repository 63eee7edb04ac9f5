//! In-memory Status Store (no persistence)
//!
//! Each record lives behind its own mutex. The outer map is only locked to
//! look a record up (shared) or to register a new one (exclusive), so
//! heartbeats and demotions for different servers never wait on each other.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: At most `MAX_SAMPLES_PER_SERVER` samples per server

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    HeartbeatOutcome, MetricSample, ServerRecord, ServerRegistration, StatusTransition,
};
use crate::ServerStatus;

/// Maximum samples to keep in memory per server
const MAX_SAMPLES_PER_SERVER: usize = 1000;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Arc<Mutex<ServerRecord>>>>,

    samples: Mutex<HashMap<String, BTreeMap<DateTime<Utc>, MetricSample>>>,

    transitions: Mutex<Vec<StatusTransition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, server_id: &str) -> StorageResult<Arc<Mutex<ServerRecord>>> {
        self.records
            .read()
            .get(server_id)
            .cloned()
            .ok_or_else(|| StorageError::UnknownServer(server_id.to_string()))
    }

    /// Log a transition; called with the record's lock held
    fn push_transition(&self, record: &ServerRecord, from: ServerStatus, at: DateTime<Utc>) {
        self.transitions.lock().push(StatusTransition {
            server_id: record.server_id.clone(),
            from,
            to: record.status,
            at,
        });
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn register_server(&self, registration: ServerRegistration) -> StorageResult<()> {
        let mut records = self.records.write();

        match records.get(&registration.server_id) {
            Some(existing) => {
                let mut record = existing.lock();
                record.address = registration.address;
                record.interval_seconds = registration.interval_seconds;
                debug!(server_id = %record.server_id, "refreshed server registration");
            }
            None => {
                debug!(server_id = %registration.server_id, "registered server");
                records.insert(
                    registration.server_id.clone(),
                    Arc::new(Mutex::new(ServerRecord::new(&registration))),
                );
            }
        }

        Ok(())
    }

    async fn get_server(&self, server_id: &str) -> StorageResult<Option<ServerRecord>> {
        let record = self.records.read().get(server_id).cloned();
        Ok(record.map(|record| record.lock().clone()))
    }

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        let records: Vec<_> = self.records.read().values().cloned().collect();
        Ok(records.iter().map(|record| record.lock().clone()).collect())
    }

    async fn record_heartbeat(
        &self,
        server_id: &str,
        timestamp: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> StorageResult<HeartbeatOutcome> {
        let record = self.record(server_id)?;
        let mut record = record.lock();

        let previous_status = record.status;

        if record.last_seen.is_none_or(|seen| timestamp > seen) {
            record.last_seen = Some(timestamp);
        }

        if previous_status != ServerStatus::On {
            record.status = ServerStatus::On;
            // Never stamp a change before the one it replaces
            let at = record
                .status_changed_at
                .map_or(received_at, |changed| changed.max(received_at));
            record.status_changed_at = Some(at);
            self.push_transition(&record, previous_status, at);
        }

        trace!(server_id, %timestamp, "heartbeat applied");

        Ok(HeartbeatOutcome {
            previous_status,
            record: record.clone(),
        })
    }

    async fn demote_if_stale(
        &self,
        server_id: &str,
        seen_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let record = self.record(server_id)?;
        let mut record = record.lock();

        let stale = record.last_seen.is_some_and(|seen| seen < seen_before);
        if record.status != ServerStatus::On || !stale {
            return Ok(false);
        }

        record.status = ServerStatus::Off;
        record.status_changed_at = Some(now);
        self.push_transition(&record, ServerStatus::On, now);

        Ok(true)
    }

    async fn insert_sample(&self, sample: MetricSample) -> StorageResult<()> {
        let mut samples = self.samples.lock();
        let series = samples.entry(sample.server_id.clone()).or_default();

        series.insert(sample.timestamp, sample);
        while series.len() > MAX_SAMPLES_PER_SERVER {
            series.pop_first();
        }

        Ok(())
    }

    async fn query_latest_samples(
        &self,
        server_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricSample>> {
        let samples = self.samples.lock();

        let mut latest: Vec<MetricSample> = samples
            .get(server_id)
            .map(|series| series.values().rev().take(limit).cloned().collect())
            .unwrap_or_default();

        latest.reverse();
        Ok(latest)
    }

    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut samples = self.samples.lock();
        let mut deleted = 0;

        for series in samples.values_mut() {
            let kept = series.split_off(&before);
            deleted += series.len();
            *series = kept;
        }

        debug!("deleted {} samples older than {}", deleted, before);
        Ok(deleted)
    }

    async fn cleanup_old_transitions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut transitions = self.transitions.lock();

        // Index of the newest pre-cutoff transition per server
        let mut newest: HashMap<&str, usize> = HashMap::new();
        for (index, transition) in transitions.iter().enumerate() {
            if transition.at >= before {
                continue;
            }
            newest
                .entry(transition.server_id.as_str())
                .and_modify(|kept| {
                    if transition.at >= transitions[*kept].at {
                        *kept = index;
                    }
                })
                .or_insert(index);
        }
        let keep: HashSet<usize> = newest.into_values().collect();

        let total = transitions.len();
        let mut index = 0;
        transitions.retain(|transition| {
            let retained = transition.at >= before || keep.contains(&index);
            index += 1;
            retained
        });

        let deleted = total - transitions.len();
        debug!("deleted {} transitions older than {}", deleted, before);
        Ok(deleted)
    }

    async fn transitions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<StatusTransition>> {
        let mut transitions: Vec<StatusTransition> = self
            .transitions
            .lock()
            .iter()
            .filter(|t| t.at >= start && t.at < end)
            .cloned()
            .collect();

        transitions.sort_by_key(|t| t.at);
        Ok(transitions)
    }

    async fn last_transition_before(
        &self,
        server_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<StatusTransition>> {
        Ok(self
            .transitions
            .lock()
            .iter()
            .filter(|t| t.server_id == server_id && t.at < at)
            .max_by_key(|t| t.at)
            .cloned())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory status store operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "servers".to_string(),
                    self.records.read().len().to_string(),
                ),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
