use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, trace};

use super::{HandlerError, MessageHandler};
use crate::MonitoringEvent;
use crate::clock::Clock;
use crate::storage::StatusStore;

/// Applies heartbeats: `last_seen = max(last_seen, ts)`, status ON
pub struct StatusUpdateHandler {
    store: Arc<dyn StatusStore>,
    clock: Clock,
}

impl StatusUpdateHandler {
    pub fn new(store: Arc<dyn StatusStore>, clock: Clock) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl MessageHandler for StatusUpdateHandler {
    #[instrument(skip_all, fields(server_id = %event.server_id))]
    async fn handle(&self, event: MonitoringEvent) -> Result<(), HandlerError> {
        let outcome = self
            .store
            .record_heartbeat(&event.server_id, event.timestamp, self.clock.now())
            .await?;

        if outcome.status_changed() {
            info!(
                from = %outcome.previous_status,
                to = %outcome.record.status,
                "server status changed"
            );
        } else {
            trace!("heartbeat recorded");
        }

        Ok(())
    }
}
