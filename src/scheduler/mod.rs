//! Recurring job scheduler
//!
//! Tasks are registered once, before `start`, from configuration:
//!
//! - **interval-check-status**: asks the Monitoring Worker for a pass
//! - **daily-report**: builds yesterday's availability report
//! - **metrics-retention**: prunes old metric samples (only when a
//!   retention period is configured)
//!
//! Duplicate names and unparsable schedules are rejected at registration;
//! nothing is validated later at fire time.

pub mod schedule;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod task;
pub mod tasks;

pub use schedule::{Schedule, ScheduleError};
pub use scheduler::{JobScheduler, SchedulerError, SchedulerStatus};
pub use task::{ScheduledTask, TaskDescriptor, TaskStatus};
pub use tasks::{
    DailyReportTask, IntervalCheckStatusTask, MetricsRetentionTask, build_scheduler,
};
