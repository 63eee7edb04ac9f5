//! MonitoringWorker - Demotes servers whose heartbeat is stale
//!
//! A pass reads every record, and for each ON record whose newest heartbeat
//! is older than `interval_seconds × grace_multiplier` asks the store to
//! demote it. Records that never reported in stay UNDEFINED.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick (optional) ──┐
//!                         ├──▶ run_pass ──▶ list_servers ──▶ demote_if_stale × N (bounded)
//! CheckNow { respond_to } ┘                                        │
//!                                                             PassReport
//! ```
//!
//! Passes never overlap. An atomic guard is taken at the start of a pass; a
//! tick or `check_now` arriving while it is held is counted as skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{PassOutcome, PassReport, WorkerCommand, WorkerStats};
use crate::ServerStatus;
use crate::clock::Clock;
use crate::config::MonitoringConfig;
use crate::storage::{ServerRecord, StatusStore};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("monitoring worker is already running")]
    AlreadyRunning,

    #[error("monitoring worker is not running")]
    NotRunning,

    #[error("monitoring worker stopped before answering")]
    Stopped,
}

enum RecordOutcome {
    Undefined,
    Unchanged,
    Demoted,
    Failed,
}

#[derive(Default)]
struct WorkerCounters {
    passes: AtomicU64,
    skipped: AtomicU64,
    demoted: AtomicU64,
    failed: AtomicU64,
}

/// Clears the pass guard however the pass ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct WorkerInner {
    store: Arc<dyn StatusStore>,
    config: MonitoringConfig,
    clock: Clock,
    pass_running: AtomicBool,
    counters: WorkerCounters,
    last_report: RwLock<Option<PassReport>>,
}

struct WorkerRuntime {
    cancel: CancellationToken,
    commands: mpsc::Sender<WorkerCommand>,
    join: JoinHandle<()>,
}

/// Ticking liveness checker
///
/// The loop is optional: `run_pass` works on a worker that was never
/// started, which is what single-shot callers and tests use.
pub struct MonitoringWorker {
    inner: Arc<WorkerInner>,
    runtime: Mutex<Option<WorkerRuntime>>,
}

impl MonitoringWorker {
    pub fn new(store: Arc<dyn StatusStore>, config: MonitoringConfig, clock: Clock) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                store,
                config,
                clock,
                pass_running: AtomicBool::new(false),
                counters: WorkerCounters::default(),
                last_report: RwLock::new(None),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// Spawn the worker loop
    pub fn start(&self) -> Result<(), WorkerError> {
        self.start_with_token(CancellationToken::new())
    }

    /// Spawn the worker loop as a child of `parent`
    pub fn start_with_token(&self, parent: CancellationToken) -> Result<(), WorkerError> {
        let mut runtime = self.runtime.lock();

        if runtime.as_ref().is_some_and(|r| !r.join.is_finished()) {
            return Err(WorkerError::AlreadyRunning);
        }

        let cancel = parent.child_token();
        // One queued request is enough; more would only be skipped
        let (commands, command_rx) = mpsc::channel(1);

        info!(
            grace_multiplier = self.inner.config.grace_multiplier,
            tick_interval = ?self.inner.config.tick_interval,
            "starting monitoring worker"
        );

        let join = tokio::spawn(Self::run(self.inner.clone(), command_rx, cancel.clone()));

        *runtime = Some(WorkerRuntime {
            cancel,
            commands,
            join,
        });

        Ok(())
    }

    /// Signal the loop and wait until it has exited after any in-flight pass
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let runtime = self.runtime.lock().take().ok_or(WorkerError::NotRunning)?;

        runtime.cancel.cancel();
        drop(runtime.commands);

        if let Err(e) = runtime.join.await {
            error!("monitoring worker task failed: {}", e);
        }

        info!("monitoring worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .as_ref()
            .is_some_and(|r| !r.join.is_finished())
    }

    /// Ask the running loop for one pass and wait for its report
    ///
    /// Returns `Skipped` without waiting when a pass is already in flight
    /// or already requested.
    pub async fn check_now(&self) -> Result<PassOutcome, WorkerError> {
        if self.inner.pass_running.load(Ordering::Acquire) {
            self.inner.skip("pass already running");
            return Ok(PassOutcome::Skipped);
        }

        let commands = self
            .runtime
            .lock()
            .as_ref()
            .map(|r| r.commands.clone())
            .ok_or(WorkerError::NotRunning)?;

        let (respond_to, response) = oneshot::channel();

        match commands.try_send(WorkerCommand::CheckNow { respond_to }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.inner.skip("pass already requested");
                return Ok(PassOutcome::Skipped);
            }
            Err(TrySendError::Closed(_)) => return Err(WorkerError::Stopped),
        }

        response.await.map_err(|_| WorkerError::Stopped)
    }

    /// Run one pass in the caller's task, judged against the worker's clock
    pub async fn run_pass(&self) -> PassOutcome {
        self.inner.run_pass(self.inner.clock.now()).await
    }

    /// Run one pass judged against an explicit "now"
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> PassOutcome {
        self.inner.run_pass(now).await
    }

    pub fn stats(&self) -> WorkerStats {
        let counters = &self.inner.counters;
        WorkerStats {
            passes: counters.passes.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            demoted: counters.demoted.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn last_report(&self) -> Option<PassReport> {
        self.inner.last_report.read().clone()
    }

    async fn run(
        inner: Arc<WorkerInner>,
        mut commands: mpsc::Receiver<WorkerCommand>,
        cancel: CancellationToken,
    ) {
        let mut ticker = inner.config.tick_interval().map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                Some(command) = commands.recv() => match command {
                    WorkerCommand::CheckNow { respond_to } => {
                        trace!("received CheckNow command");
                        let outcome = inner.run_pass(inner.clock.now()).await;
                        let _ = respond_to.send(outcome);
                    }
                },

                _ = next_tick(&mut ticker) => {
                    inner.run_pass(inner.clock.now()).await;
                }
            }
        }

        debug!("monitoring worker loop exited");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl WorkerInner {
    fn skip(&self, reason: &str) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        debug!("skipping monitoring pass: {}", reason);
    }

    #[instrument(skip_all, fields(now = %now))]
    async fn run_pass(&self, now: DateTime<Utc>) -> PassOutcome {
        if self
            .pass_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skip("pass already running");
            return PassOutcome::Skipped;
        }
        let _guard = PassGuard(&self.pass_running);

        let started = Instant::now();
        let mut report = PassReport::new(now);

        match timeout(self.config.store_timeout(), self.store.list_servers()).await {
            Ok(Ok(records)) => {
                report.scanned = records.len();

                let outcomes: Vec<RecordOutcome> = stream::iter(records)
                    .map(|record| self.check_record(record, now))
                    .buffer_unordered(self.config.max_concurrency.max(1))
                    .collect()
                    .await;

                for outcome in outcomes {
                    match outcome {
                        RecordOutcome::Undefined => report.undefined += 1,
                        RecordOutcome::Demoted => report.demoted += 1,
                        RecordOutcome::Failed => report.failed += 1,
                        RecordOutcome::Unchanged => {}
                    }
                }
            }
            Ok(Err(e)) => {
                error!("failed to list servers: {}", e);
                report.list_error = Some(e.to_string());
            }
            Err(_) => {
                error!("listing servers timed out");
                report.list_error = Some("listing servers timed out".to_string());
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .demoted
            .fetch_add(report.demoted as u64, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        debug!(
            scanned = report.scanned,
            demoted = report.demoted,
            undefined = report.undefined,
            failed = report.failed,
            "monitoring pass complete"
        );

        *self.last_report.write() = Some(report.clone());
        PassOutcome::Completed(report)
    }

    async fn check_record(&self, record: ServerRecord, now: DateTime<Utc>) -> RecordOutcome {
        let grace = self.config.grace_multiplier;

        let Some(last_seen) = record.last_seen else {
            return RecordOutcome::Undefined;
        };

        if record.status != ServerStatus::On || !record.is_stale(now, grace) {
            return RecordOutcome::Unchanged;
        }

        let seen_before = now - record.liveness_window(grace);
        let demotion = self
            .store
            .demote_if_stale(&record.server_id, seen_before, now);

        match timeout(self.config.store_timeout(), demotion).await {
            Ok(Ok(true)) => {
                info!(
                    server_id = %record.server_id,
                    %last_seen,
                    "no heartbeat within {}s, server is OFF",
                    record.liveness_window(grace).num_seconds()
                );
                RecordOutcome::Demoted
            }
            // A fresh heartbeat landed between the read and the demotion
            Ok(Ok(false)) => RecordOutcome::Unchanged,
            Ok(Err(e)) => {
                warn!(server_id = %record.server_id, "failed to demote server: {}", e);
                RecordOutcome::Failed
            }
            Err(_) => {
                warn!(
                    server_id = %record.server_id,
                    "demotion timed out after {:?}",
                    self.config.store_timeout()
                );
                RecordOutcome::Failed
            }
        }
    }
}
