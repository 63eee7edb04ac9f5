//! ConsumerGroup - Subscribes to one queue and dispatches by message type
//!
//! ## Message Flow
//!
//! ```text
//! queue ──▶ RawMessage ──lookup(message_type)──▶ decode ──▶ handler.handle(event) (deadline)
//!                               │                   │               │
//!                          no handler          malformed      error / timeout
//!                               └──── logged, counted, loop continues ────┘
//! ```
//!
//! There is no retry and no dead-lettering. Cancellation ends the loop
//! between messages, never in the middle of a handler call.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::ConsumerStats;
use crate::bus::{BusError, EventBus, MessageStream, MessageType, RawMessage};
use crate::handlers::MessageHandler;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("a handler for '{0}' is already registered")]
    DuplicateHandler(MessageType),

    #[error("failed to subscribe: {0}")]
    Subscribe(#[from] BusError),
}

#[derive(Default)]
struct ConsumerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    timed_out: AtomicU64,
}

impl ConsumerCounters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Handlers for one queue, before the loop is started
pub struct ConsumerGroup {
    queue: String,
    bus: Arc<dyn EventBus>,
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
    handler_timeout: Duration,
}

impl ConsumerGroup {
    pub fn new(
        queue: impl Into<String>,
        bus: Arc<dyn EventBus>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            queue: queue.into(),
            bus,
            handlers: HashMap::new(),
            handler_timeout,
        }
    }

    /// Register the single handler for `message_type`
    pub fn register_handler(
        &mut self,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ConsumerError> {
        if self.handlers.contains_key(&message_type) {
            return Err(ConsumerError::DuplicateHandler(message_type));
        }

        self.handlers.insert(message_type, handler);
        Ok(())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Subscribe and spawn the receive loop
    ///
    /// The loop stops when `cancel` fires, when `ConsumerHandle::stop` is
    /// called, or when the bus closes.
    pub fn start(self, cancel: CancellationToken) -> Result<ConsumerHandle, ConsumerError> {
        let stream = self.bus.subscribe(&self.queue)?;
        let counters = Arc::new(ConsumerCounters::default());
        let cancel = cancel.child_token();

        info!(
            queue = %self.queue,
            handlers = self.handlers.len(),
            "starting consumer group"
        );

        let queue = self.queue.clone();
        let join = tokio::spawn(self.run(stream, cancel.clone(), counters.clone()));

        Ok(ConsumerHandle {
            queue,
            cancel,
            counters,
            join,
        })
    }

    #[instrument(skip_all, fields(queue = %self.queue))]
    async fn run(
        self,
        mut stream: MessageStream,
        cancel: CancellationToken,
        counters: Arc<ConsumerCounters>,
    ) {
        debug!("consumer loop started");

        loop {
            let message = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                message = stream.next() => match message {
                    Some(message) => message,
                    None => {
                        debug!("subscription ended");
                        break;
                    }
                },
            };

            self.dispatch(message, &counters).await;
        }

        // Dropping the stream hands the queue back to the bus
        drop(stream);
        debug!("consumer loop stopped");
    }

    async fn dispatch(&self, message: RawMessage, counters: &ConsumerCounters) {
        let message_type = message.message_type;

        let Some(handler) = self.handlers.get(&message_type) else {
            warn!(%message_type, "no handler registered, dropping message");
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let event = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                warn!(%message_type, "malformed payload, dropping message: {}", e);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let server_id = event.server_id.clone();

        match timeout(self.handler_timeout, handler.handle(event)).await {
            Ok(Ok(())) => {
                trace!(%message_type, %server_id, "message processed");
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) if e.is_data_error() => {
                warn!(%message_type, %server_id, "dropping message: {}", e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                error!(%message_type, %server_id, "handler failed: {}", e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                warn!(
                    %message_type,
                    %server_id,
                    "handler exceeded {:?}, skipping message",
                    self.handler_timeout
                );
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Control handle of a running consumer loop
pub struct ConsumerHandle {
    queue: String,
    cancel: CancellationToken,
    counters: Arc<ConsumerCounters>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the loop and wait until it has exited
    pub async fn stop(self) -> ConsumerStats {
        self.cancel.cancel();

        if let Err(e) = self.join.await {
            error!(queue = %self.queue, "consumer task failed: {}", e);
        }

        self.counters.snapshot()
    }
}
