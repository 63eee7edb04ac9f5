//! JobScheduler - Fires named tasks on their schedules
//!
//! ## Message Flow
//!
//! ```text
//! driver (one per task) ── sleep until next_run ──▶ fire
//!                                                    │
//!                     status == RUNNING ? ── yes ──▶ skip ("missed run due to overlap")
//!                                                    │ no: CAS → RUNNING, last_run = now
//!                                                    ▼
//!                               spawn invocation (task_timeout) ──▶ IDLE | FAILED
//! ```
//!
//! A driver never waits for the invocation it spawned, so a slow task cannot
//! delay the computation of its own next fire.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::schedule::{Schedule, ScheduleError};
use super::task::{ScheduledTask, TaskDescriptor, TaskEntry, TaskStatus};
use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("task '{task}': {source}")]
    InvalidSchedule {
        task: String,
        source: ScheduleError,
    },

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub failed_tasks: usize,
    pub tasks: Vec<TaskDescriptor>,
}

struct SchedulerRuntime {
    cancel: CancellationToken,
    tracker: TaskTracker,
    started_at: DateTime<Utc>,
}

pub struct JobScheduler {
    tasks: Vec<Arc<TaskEntry>>,
    names: HashSet<String>,
    task_timeout: Duration,
    clock: Clock,
    runtime: Mutex<Option<SchedulerRuntime>>,
    last_started_at: RwLock<Option<DateTime<Utc>>>,
}

impl JobScheduler {
    pub fn new(task_timeout: Duration, clock: Clock) -> Self {
        Self {
            tasks: Vec::new(),
            names: HashSet::new(),
            task_timeout,
            clock,
            runtime: Mutex::new(None),
            last_started_at: RwLock::new(None),
        }
    }

    /// Register a task; its schedule is parsed here, once
    pub fn add_task(&mut self, task: Arc<dyn ScheduledTask>) -> Result<(), SchedulerError> {
        let name = task.name().to_string();

        if self.names.contains(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }

        let schedule =
            Schedule::parse(task.schedule()).map_err(|source| SchedulerError::InvalidSchedule {
                task: name.clone(),
                source,
            })?;

        debug!(task = %name, %schedule, "task registered");

        self.names.insert(name);
        self.tasks.push(Arc::new(TaskEntry::new(task, schedule)));
        Ok(())
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        self.start_with_token(CancellationToken::new())
    }

    /// Spawn one driver per registered task
    pub fn start_with_token(&self, parent: CancellationToken) -> Result<(), SchedulerError> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let cancel = parent.child_token();
        let tracker = TaskTracker::new();
        let started_at = self.clock.now();

        for entry in &self.tasks {
            let driver = Driver {
                entry: entry.clone(),
                clock: self.clock,
                task_timeout: self.task_timeout,
                cancel: cancel.clone(),
                tracker: tracker.clone(),
            };
            tracker.spawn(
                driver
                    .run()
                    .instrument(info_span!("scheduler", task = %entry.name)),
            );
        }

        info!(tasks = self.tasks.len(), "job scheduler started");

        *self.last_started_at.write() = Some(started_at);
        *runtime = Some(SchedulerRuntime {
            cancel,
            tracker,
            started_at,
        });

        Ok(())
    }

    /// Cancel all drivers and wait for in-flight invocations to finish
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let runtime = self.runtime.lock().take().ok_or(SchedulerError::NotRunning)?;

        runtime.cancel.cancel();
        runtime.tracker.close();
        runtime.tracker.wait().await;

        for entry in &self.tasks {
            entry.set_next_run(None);
        }

        info!("job scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    pub fn list_tasks(&self) -> Vec<TaskDescriptor> {
        self.tasks.iter().map(|entry| entry.descriptor()).collect()
    }

    pub fn get_task(&self, name: &str) -> Option<TaskDescriptor> {
        self.tasks
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.descriptor())
    }

    pub fn status(&self) -> SchedulerStatus {
        let (running, started_at) = match self.runtime.lock().as_ref() {
            Some(runtime) => (true, Some(runtime.started_at)),
            None => (false, *self.last_started_at.read()),
        };
        let tasks = self.list_tasks();
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();

        SchedulerStatus {
            running,
            started_at,
            total_tasks: tasks.len(),
            running_tasks: count(TaskStatus::Running),
            failed_tasks: count(TaskStatus::Failed),
            tasks,
        }
    }
}

struct Driver {
    entry: Arc<TaskEntry>,
    clock: Clock,
    task_timeout: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Driver {
    async fn run(self) {
        let mut fire_at = match self.entry.schedule.next_after(self.clock.now()) {
            Some(fire_at) => fire_at,
            None => {
                warn!("schedule has no upcoming fire time");
                return;
            }
        };
        self.entry.set_next_run(Some(fire_at));

        loop {
            let delay = (fire_at - self.clock.now()).to_std().unwrap_or_default();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                _ = tokio::time::sleep(delay) => {}
            }

            self.fire();

            let now = self.clock.now();
            let next = match self.entry.schedule.next_after(fire_at) {
                Some(next) if next < now => {
                    warn!("fell behind schedule, skipping to the next fire after {}", now);
                    self.entry.schedule.next_after(now)
                }
                next => next,
            };

            self.entry.set_next_run(next);
            match next {
                Some(next) => fire_at = next,
                None => {
                    debug!("schedule exhausted");
                    break;
                }
            }
        }
    }

    fn fire(&self) {
        if !self.entry.try_begin(self.clock.now()) {
            warn!("missed run due to overlap");
            return;
        }

        let entry = self.entry.clone();
        let task_timeout = self.task_timeout;

        self.tracker.spawn(
            async move {
                debug!("task started");

                let error = match timeout(task_timeout, entry.task.execute()).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(format!("{e:#}")),
                    Err(_) => Some(format!("timed out after {task_timeout:?}")),
                };

                match &error {
                    None => debug!("task finished"),
                    Some(e) => error!("task failed: {}", e),
                }

                entry.finish(error);
            }
            .in_current_span(),
        );
    }
}
