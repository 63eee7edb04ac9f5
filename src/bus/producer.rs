use std::sync::Arc;

use tracing::{instrument, trace};

use super::error::BusResult;
use super::message::MessageType;
use super::EventBus;
use crate::MonitoringEvent;

/// Publishes monitoring events onto the status and metrics queues
///
/// Every event goes to the status queue as a heartbeat. Events carrying any
/// metric are additionally published to the metrics queue.
#[derive(Clone)]
pub struct MonitoringEventProducer {
    bus: Arc<dyn EventBus>,
    status_queue: String,
    metrics_queue: String,
}

impl MonitoringEventProducer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        status_queue: impl Into<String>,
        metrics_queue: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            status_queue: status_queue.into(),
            metrics_queue: metrics_queue.into(),
        }
    }

    #[instrument(skip_all, fields(server_id = %event.server_id))]
    pub async fn publish(&self, event: &MonitoringEvent) -> BusResult<()> {
        event.validate()?;
        let payload = serde_json::to_vec(event)?;

        if event.has_metrics() {
            self.bus
                .publish(&self.metrics_queue, MessageType::Metrics, payload.clone())
                .await?;
        }

        self.bus
            .publish(&self.status_queue, MessageType::Heartbeat, payload)
            .await?;

        trace!("event published");
        Ok(())
    }
}
