//! Message types for actor communication
//!
//! Commands travel over mpsc channels to a specific actor and carry a
//! oneshot `respond_to` when the caller wants an answer. Reports and stats
//! are plain cloneable snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Commands that can be sent to the running MonitoringWorker loop
#[derive(Debug)]
pub enum WorkerCommand {
    /// Run one pass now and report back
    ///
    /// This is how the scheduler's `interval-check-status` task drives the
    /// worker. The answer is `Skipped` when a pass was already in flight.
    CheckNow {
        respond_to: oneshot::Sender<PassOutcome>,
    },
}

/// Result of asking for a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(PassReport),

    /// Another pass held the guard; nothing was scanned
    Skipped,
}

/// Summary of one completed worker pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    /// The "now" every record in this pass was judged against
    pub started_at: DateTime<Utc>,

    pub scanned: usize,

    /// Records transitioned ON → OFF by this pass
    pub demoted: usize,

    /// Records still waiting for their first heartbeat
    pub undefined: usize,

    /// Records whose store call failed or timed out
    pub failed: usize,

    /// Set when the record list itself could not be read
    pub list_error: Option<String>,

    pub duration_ms: u64,
}

impl PassReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            scanned: 0,
            demoted: 0,
            undefined: 0,
            failed: 0,
            list_error: None,
            duration_ms: 0,
        }
    }
}

/// Monotonic worker counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub passes: u64,
    pub skipped: u64,
    pub demoted: u64,
    pub failed: u64,
}

/// Per-queue consumer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Messages a handler accepted
    pub processed: u64,

    /// Messages a handler rejected (data or storage error)
    pub failed: u64,

    /// Messages without a handler, or with an undecodable payload
    pub dropped: u64,

    /// Handler calls that exceeded the deadline
    pub timed_out: u64,
}
