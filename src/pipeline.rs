//! Pipeline assembly
//!
//! Wires the Status Store, the Event Bus, one Consumer Group per queue, the
//! Monitoring Worker and the Job Scheduler, and exposes the read-only
//! queries the ops surface needs.
//!
//! ## Startup order
//!
//! 1. register the configured servers
//! 2. start the consumers (status queue → `StatusUpdateHandler`,
//!    metrics queue → `MetricsUpdateHandler`)
//! 3. start the worker loop and run one pass right away
//! 4. start the scheduler
//!
//! `shutdown` stops them in reverse and closes the bus and the store.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ServerStatus;
use crate::actors::{
    ConsumerGroup, ConsumerHandle, ConsumerStats, MonitoringWorker, PassOutcome, WorkerError,
};
use crate::bus::{EventBus, MemoryBus, MessageType, MonitoringEventProducer};
use crate::clock::Clock;
use crate::config::Config;
use crate::handlers::{MetricsUpdateHandler, StatusUpdateHandler};
use crate::report::{ReportService, sink};
use crate::scheduler::{
    JobScheduler, SchedulerError, SchedulerStatus, TaskDescriptor, build_scheduler,
};
use crate::storage::{self, StatusStore, StorageResult};

pub struct Pipeline {
    config: Config,
    store: Arc<dyn StatusStore>,
    bus: Arc<MemoryBus>,
    producer: MonitoringEventProducer,
    worker: Arc<MonitoringWorker>,
    scheduler: Arc<JobScheduler>,
    consumers: Mutex<Vec<ConsumerHandle>>,
    clock: Clock,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Validate the configuration and open the configured store
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let store = storage::open(&config.storage)
            .await
            .context("failed to open status store")?;

        Self::with_store(config, store, Clock::new())
    }

    /// Assemble around an existing store
    pub fn with_store(
        config: Config,
        store: Arc<dyn StatusStore>,
        clock: Clock,
    ) -> anyhow::Result<Self> {
        let bus = Arc::new(MemoryBus::new(config.bus.capacity));
        let producer = MonitoringEventProducer::new(
            bus.clone(),
            config.bus.status_queue.clone(),
            config.bus.metrics_queue.clone(),
        );

        let worker = Arc::new(MonitoringWorker::new(
            store.clone(),
            config.monitoring.clone(),
            clock,
        ));
        let reports = Arc::new(ReportService::new(
            store.clone(),
            sink::from_config(&config.report.sink),
            clock,
        ));

        let scheduler = build_scheduler(
            &config.scheduler,
            config.storage.retention_days(),
            worker.clone(),
            reports,
            store.clone(),
            clock,
        )?;

        Ok(Self {
            config,
            store,
            bus,
            producer,
            worker,
            scheduler: Arc::new(scheduler),
            consumers: Mutex::new(Vec::new()),
            clock,
            cancel: CancellationToken::new(),
        })
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        for server in &self.config.servers {
            self.store
                .register_server(server.registration())
                .await
                .with_context(|| format!("failed to register server '{}'", server.server_id))?;
        }
        info!(servers = self.config.servers.len(), "servers registered");

        let handler_timeout = self.config.bus.handler_timeout();

        let mut status_group = ConsumerGroup::new(
            self.config.bus.status_queue.clone(),
            self.bus.clone(),
            handler_timeout,
        );
        status_group.register_handler(
            MessageType::Heartbeat,
            Arc::new(StatusUpdateHandler::new(self.store.clone(), self.clock)),
        )?;

        let mut metrics_group = ConsumerGroup::new(
            self.config.bus.metrics_queue.clone(),
            self.bus.clone(),
            handler_timeout,
        );
        metrics_group.register_handler(
            MessageType::Metrics,
            Arc::new(MetricsUpdateHandler::new(self.store.clone(), self.clock)),
        )?;

        {
            let mut consumers = self.consumers.lock();
            consumers.push(status_group.start(self.cancel.clone())?);
            consumers.push(metrics_group.start(self.cancel.clone())?);
        }

        self.worker.start_with_token(self.cancel.clone())?;
        if let PassOutcome::Completed(report) = self.worker.check_now().await? {
            debug!(
                scanned = report.scanned,
                demoted = report.demoted,
                "initial monitoring pass complete"
            );
        }

        self.scheduler.start_with_token(self.cancel.clone())?;

        info!("liveness pipeline started");
        Ok(())
    }

    /// Stop scheduler, worker and consumers, then close the bus and the store
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("shutting down liveness pipeline");

        match self.scheduler.stop().await {
            Ok(()) | Err(SchedulerError::NotRunning) => {}
            Err(e) => warn!("failed to stop scheduler: {}", e),
        }

        match self.worker.stop().await {
            Ok(()) | Err(WorkerError::NotRunning) => {}
            Err(e) => warn!("failed to stop monitoring worker: {}", e),
        }

        let consumers = std::mem::take(&mut *self.consumers.lock());
        for consumer in consumers {
            let queue = consumer.queue().to_string();
            let stats = consumer.stop().await;
            debug!(
                %queue,
                processed = stats.processed,
                failed = stats.failed,
                dropped = stats.dropped,
                timed_out = stats.timed_out,
                "consumer stopped"
            );
        }

        self.cancel.cancel();
        self.bus.close();
        self.store.close().await?;

        info!("liveness pipeline stopped");
        Ok(())
    }

    /// Current status of one server, `None` when it is not registered
    pub async fn get_server_status(&self, server_id: &str) -> StorageResult<Option<ServerStatus>> {
        Ok(self
            .store
            .get_server(server_id)
            .await?
            .map(|record| record.status))
    }

    pub fn list_tasks(&self) -> Vec<TaskDescriptor> {
        self.scheduler.list_tasks()
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn consumer_stats(&self) -> Vec<(String, ConsumerStats)> {
        self.consumers
            .lock()
            .iter()
            .map(|consumer| (consumer.queue().to_string(), consumer.stats()))
            .collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn StatusStore> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    pub fn producer(&self) -> MonitoringEventProducer {
        self.producer.clone()
    }

    pub fn worker(&self) -> Arc<MonitoringWorker> {
        self.worker.clone()
    }

    pub fn scheduler(&self) -> Arc<JobScheduler> {
        self.scheduler.clone()
    }

    /// Cancelled once the pipeline has shut down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
