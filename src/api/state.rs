//! API shared state

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::bus::MonitoringEventProducer;
use crate::pipeline::Pipeline;
use crate::scheduler::JobScheduler;
use crate::storage::StatusStore;

/// Handles the routes need: reads go to the store and the scheduler,
/// ingestion goes through the producer
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn StatusStore>,
    pub producer: MonitoringEventProducer,
    pub scheduler: Arc<JobScheduler>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn StatusStore>,
        producer: MonitoringEventProducer,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            store,
            producer,
            scheduler,
            started_at: Utc::now(),
        }
    }

    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self::new(pipeline.store(), pipeline.producer(), pipeline.scheduler())
    }
}
