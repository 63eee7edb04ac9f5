use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Days, Duration};
use tracing::{debug, info};

use super::scheduler::{JobScheduler, SchedulerError};
use super::task::ScheduledTask;
use crate::actors::{MonitoringWorker, PassOutcome, WorkerError};
use crate::clock::Clock;
use crate::config::{SchedulerConfig, TaskConfig};
use crate::report::ReportService;
use crate::storage::StatusStore;

/// Drives one Monitoring Worker pass per fire
///
/// Prefers the running worker loop; falls back to an inline pass when the
/// loop has not been started.
pub struct IntervalCheckStatusTask {
    config: TaskConfig,
    worker: Arc<MonitoringWorker>,
}

impl IntervalCheckStatusTask {
    pub fn new(config: TaskConfig, worker: Arc<MonitoringWorker>) -> Self {
        Self { config, worker }
    }
}

#[async_trait]
impl ScheduledTask for IntervalCheckStatusTask {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn schedule(&self) -> &str {
        &self.config.schedule
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let outcome = match self.worker.check_now().await {
            Ok(outcome) => outcome,
            Err(WorkerError::NotRunning) => self.worker.run_pass().await,
            Err(e) => return Err(e.into()),
        };

        match outcome {
            PassOutcome::Completed(report) => {
                if let Some(error) = report.list_error {
                    anyhow::bail!("monitoring pass could not read servers: {error}");
                }
            }
            PassOutcome::Skipped => debug!("monitoring pass already in flight"),
        }

        Ok(())
    }
}

/// Reports on the previous UTC day
pub struct DailyReportTask {
    config: TaskConfig,
    reports: Arc<ReportService>,
    clock: Clock,
}

impl DailyReportTask {
    pub fn new(config: TaskConfig, reports: Arc<ReportService>, clock: Clock) -> Self {
        Self {
            config,
            reports,
            clock,
        }
    }
}

#[async_trait]
impl ScheduledTask for DailyReportTask {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn schedule(&self) -> &str {
        &self.config.schedule
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let yesterday = self
            .clock
            .now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .context("no previous day to report on")?;

        let report = self
            .reports
            .send_daily_report(yesterday)
            .await
            .with_context(|| format!("failed to send daily report for {yesterday}"))?;

        info!(
            date = %report.date,
            sink = self.reports.sink_name(),
            "daily report sent"
        );
        Ok(())
    }
}

/// Deletes metric samples older than the retention period
pub struct MetricsRetentionTask {
    config: TaskConfig,
    store: Arc<dyn StatusStore>,
    retention: Duration,
    clock: Clock,
}

impl MetricsRetentionTask {
    pub fn new(
        config: TaskConfig,
        store: Arc<dyn StatusStore>,
        retention_days: u32,
        clock: Clock,
    ) -> Self {
        Self {
            config,
            store,
            retention: Duration::days(retention_days as i64),
            clock,
        }
    }
}

#[async_trait]
impl ScheduledTask for MetricsRetentionTask {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn schedule(&self) -> &str {
        &self.config.schedule
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let cutoff = self.clock.now() - self.retention;
        let deleted = self.store.cleanup_old_samples(cutoff).await?;
        let pruned = self.store.cleanup_old_transitions(cutoff).await?;

        info!(deleted, pruned, %cutoff, "metric retention applied");
        Ok(())
    }
}

/// Register the fixed task set described by the configuration
pub fn build_scheduler(
    config: &SchedulerConfig,
    retention_days: Option<u32>,
    worker: Arc<MonitoringWorker>,
    reports: Arc<ReportService>,
    store: Arc<dyn StatusStore>,
    clock: Clock,
) -> Result<JobScheduler, SchedulerError> {
    let mut scheduler = JobScheduler::new(config.task_timeout(), clock);

    scheduler.add_task(Arc::new(IntervalCheckStatusTask::new(
        config.interval_check_status.clone(),
        worker,
    )))?;

    scheduler.add_task(Arc::new(DailyReportTask::new(
        config.daily_report.clone(),
        reports,
        clock,
    )))?;

    if let Some(days) = retention_days {
        scheduler.add_task(Arc::new(MetricsRetentionTask::new(
            config.metrics_retention.clone(),
            store,
            days,
            clock,
        )))?;
    }

    Ok(scheduler)
}
