//! Daily availability report
//!
//! Uptime is derived from the status transition log: the status in force at
//! midnight UTC (the newest transition before the day, UNDEFINED if none)
//! is walked forward through the day's transitions, and only time spent ON
//! counts. A report for the current day stops at "now".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::ServerStatus;
use crate::clock::Clock;
use crate::storage::{StatusStore, StatusTransition, StorageError};

pub mod sink;

pub use sink::{FileReportSink, LogReportSink, ReportSink, WebhookReportSink};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("cannot report on {0}, the day has not started yet")]
    FutureDay(NaiveDate),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to send report webhook: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("report webhook answered with HTTP {0}")]
    WebhookStatus(u16),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUptime {
    pub server_id: String,

    /// Status at the time the report was generated
    pub status: ServerStatus,

    pub uptime_percent: f64,

    /// Status changes during the day
    pub transitions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub total_servers: usize,
    pub online: usize,
    pub offline: usize,
    pub undefined: usize,
    pub average_uptime: f64,
    pub servers: Vec<ServerUptime>,
}

pub struct ReportService {
    store: Arc<dyn StatusStore>,
    sink: Box<dyn ReportSink>,
    clock: Clock,
}

impl ReportService {
    pub fn new(store: Arc<dyn StatusStore>, sink: Box<dyn ReportSink>, clock: Clock) -> Self {
        Self { store, sink, clock }
    }

    #[instrument(skip(self))]
    pub async fn build_daily_report(&self, day: NaiveDate) -> Result<DailyReport, ReportError> {
        let now = self.clock.now();
        let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = (start + Duration::days(1)).min(now);

        if end <= start {
            return Err(ReportError::FutureDay(day));
        }

        let mut by_server: HashMap<String, Vec<StatusTransition>> = HashMap::new();
        for transition in self.store.transitions_between(start, end).await? {
            by_server
                .entry(transition.server_id.clone())
                .or_default()
                .push(transition);
        }

        let mut records = self.store.list_servers().await?;
        records.sort_by(|a, b| a.server_id.cmp(&b.server_id));

        let mut servers = Vec::with_capacity(records.len());
        for record in records {
            let initial = self
                .store
                .last_transition_before(&record.server_id, start)
                .await?
                .map(|t| t.to)
                .unwrap_or(ServerStatus::Undefined);
            let transitions = by_server.remove(&record.server_id).unwrap_or_default();

            servers.push(ServerUptime {
                uptime_percent: uptime_percent(initial, &transitions, start, end),
                transitions: transitions.len(),
                server_id: record.server_id,
                status: record.status,
            });
        }

        let count = |status: ServerStatus| servers.iter().filter(|s| s.status == status).count();
        let average_uptime = if servers.is_empty() {
            0.0
        } else {
            round2(servers.iter().map(|s| s.uptime_percent).sum::<f64>() / servers.len() as f64)
        };

        Ok(DailyReport {
            date: day,
            generated_at: now,
            total_servers: servers.len(),
            online: count(ServerStatus::On),
            offline: count(ServerStatus::Off),
            undefined: count(ServerStatus::Undefined),
            average_uptime,
            servers,
        })
    }

    /// Build the report for `day` and hand it to the configured sink
    pub async fn send_daily_report(&self, day: NaiveDate) -> Result<DailyReport, ReportError> {
        let report = self.build_daily_report(day).await?;
        self.sink.deliver(&report).await?;
        Ok(report)
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }
}

/// Share of `[start, end)` spent ON, in percent with two decimals
///
/// `transitions` must be sorted by time and lie within the window.
pub fn uptime_percent(
    initial: ServerStatus,
    transitions: &[StatusTransition],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> f64 {
    let total = (end - start).num_milliseconds();
    if total <= 0 {
        return 0.0;
    }

    let mut status = initial;
    let mut since = start;
    let mut on_millis = 0;

    for transition in transitions {
        let at = transition.at.clamp(start, end);
        if status == ServerStatus::On {
            on_millis += (at - since).num_milliseconds();
        }
        status = transition.to;
        since = at;
    }

    if status == ServerStatus::On {
        on_millis += (end - since).num_milliseconds();
    }

    round2(on_millis as f64 * 100.0 / total as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
