//! Long-running actors of the liveness pipeline
//!
//! Each actor runs as an independent tokio task and stops when its
//! `CancellationToken` fires, after finishing the unit of work in hand.
//!
//! ## Message Flow
//!
//! ```text
//! EventBus ──subscribe──▶ ConsumerGroup (one per queue) ──▶ MessageHandler ──▶ StatusStore
//!                                                                                 ▲
//! JobScheduler ──CheckNow──▶ MonitoringWorker ──demote_if_stale───────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **ConsumerGroup**: receives from one queue, dispatches by `MessageType`
//! - **MonitoringWorker**: scans all records and demotes stale servers to OFF

pub mod consumer;
pub mod messages;
pub mod worker;

pub use consumer::{ConsumerError, ConsumerGroup, ConsumerHandle};
pub use messages::{ConsumerStats, PassOutcome, PassReport, WorkerCommand, WorkerStats};
pub use worker::{MonitoringWorker, WorkerError};
