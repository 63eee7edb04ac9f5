use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::schedule::Schedule;

/// A named recurring job
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    /// Schedule expression, parsed once when the task is registered
    fn schedule(&self) -> &str;

    async fn execute(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Idle,
    Running,
    Failed,
}

impl TaskStatus {
    const IDLE: u8 = 0;
    const RUNNING: u8 = 1;
    const FAILED: u8 = 2;

    fn from_u8(value: u8) -> Self {
        match value {
            Self::RUNNING => TaskStatus::Running,
            Self::FAILED => TaskStatus::Failed,
            _ => TaskStatus::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Idle => Self::IDLE,
            TaskStatus::Running => Self::RUNNING,
            TaskStatus::Failed => Self::FAILED,
        }
    }
}

/// Read-only view of a registered task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub schedule: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub run_count: u64,
    pub failure_count: u64,
    pub skipped_count: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct TaskTimes {
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Scheduler-side state of one task
///
/// `status` is the overlap guard: a fire may only start an invocation by
/// swapping it to RUNNING. The lock around the timestamps is never held
/// across an await.
pub(crate) struct TaskEntry {
    pub(crate) task: Arc<dyn ScheduledTask>,
    pub(crate) name: String,
    pub(crate) schedule: Schedule,
    status: AtomicU8,
    times: RwLock<TaskTimes>,
    run_count: AtomicU64,
    failure_count: AtomicU64,
    skipped_count: AtomicU64,
}

impl TaskEntry {
    pub(crate) fn new(task: Arc<dyn ScheduledTask>, schedule: Schedule) -> Self {
        Self {
            name: task.name().to_string(),
            task,
            schedule,
            status: AtomicU8::new(TaskStatus::IDLE),
            times: RwLock::new(TaskTimes::default()),
            run_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            skipped_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// IDLE/FAILED → RUNNING; false if an invocation is already in flight
    pub(crate) fn try_begin(&self, now: DateTime<Utc>) -> bool {
        let acquired = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != TaskStatus::RUNNING).then_some(TaskStatus::RUNNING)
            })
            .is_ok();

        if acquired {
            self.times.write().last_run = Some(now);
        } else {
            self.skipped_count.fetch_add(1, Ordering::Relaxed);
        }

        acquired
    }

    pub(crate) fn finish(&self, error: Option<String>) {
        self.run_count.fetch_add(1, Ordering::Relaxed);

        let status = match &error {
            Some(_) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                TaskStatus::Failed
            }
            None => TaskStatus::Idle,
        };

        self.times.write().last_error = error;
        self.status.store(status.as_u8(), Ordering::Release);
    }

    pub(crate) fn set_next_run(&self, next_run: Option<DateTime<Utc>>) {
        self.times.write().next_run = next_run;
    }

    pub(crate) fn descriptor(&self) -> TaskDescriptor {
        let times = self.times.read();

        TaskDescriptor {
            name: self.name.clone(),
            schedule: self.schedule.to_string(),
            last_run: times.last_run,
            next_run: times.next_run,
            status: self.status(),
            run_count: self.run_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            skipped_count: self.skipped_count.load(Ordering::Relaxed),
            last_error: times.last_error.clone(),
        }
    }
}
