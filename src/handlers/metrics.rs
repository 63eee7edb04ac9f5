use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, trace};

use super::{HandlerError, MessageHandler};
use crate::MonitoringEvent;
use crate::clock::Clock;
use crate::storage::{MetricSample, StatusStore};

/// Validates a resource snapshot, applies the heartbeat and upserts the sample
pub struct MetricsUpdateHandler {
    store: Arc<dyn StatusStore>,
    clock: Clock,
}

impl MetricsUpdateHandler {
    pub fn new(store: Arc<dyn StatusStore>, clock: Clock) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl MessageHandler for MetricsUpdateHandler {
    #[instrument(skip_all, fields(server_id = %event.server_id))]
    async fn handle(&self, event: MonitoringEvent) -> Result<(), HandlerError> {
        event.validate()?;

        // Unknown servers fail here, before any sample is written
        self.store
            .record_heartbeat(&event.server_id, event.timestamp, self.clock.now())
            .await?;

        if event.has_metrics() {
            self.store
                .insert_sample(MetricSample::from_event(&event))
                .await?;
            trace!(cpu = ?event.cpu, ram = ?event.ram, disk = ?event.disk, "sample stored");
        }

        Ok(())
    }
}
