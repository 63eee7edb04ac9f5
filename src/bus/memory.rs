//! In-process Event Bus
//!
//! Every named queue is a bounded tokio mpsc channel. The bus keeps the
//! receiving half while nobody is subscribed; `subscribe` hands it out and
//! dropping the subscription gives it back, undelivered messages included.
//!
//! ```text
//! publish ──try_send──▶ [ queue: server.status ] ──poll_recv──▶ MemorySubscription
//!                                 ▲                                     │
//!                                 └──────── returned on drop ───────────┘
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use super::error::{BusError, BusResult};
use super::message::{MessageType, RawMessage};
use super::{EventBus, MessageStream};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct QueueSlot {
    sender: mpsc::Sender<RawMessage>,

    /// `None` while a subscriber holds the receiver
    receiver: Option<mpsc::Receiver<RawMessage>>,
}

struct BusInner {
    queues: Mutex<HashMap<String, QueueSlot>>,
    capacity: usize,
    closed: AtomicBool,
}

impl BusInner {
    /// Run `f` on the queue's slot, creating it on first use
    ///
    /// The closed flag is read under the queues lock, which `close` also
    /// holds while flipping it, so no slot can appear after close.
    fn with_slot<R>(&self, queue: &str, f: impl FnOnce(&mut QueueSlot) -> R) -> BusResult<R> {
        let mut queues = self.queues.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let slot = queues.entry(queue.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(self.capacity);
            QueueSlot {
                sender,
                receiver: Some(receiver),
            }
        });
        Ok(f(slot))
    }
}

/// Named-queue bus backed by tokio channels
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                queues: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Messages published to `queue` and not yet received
    pub fn pending(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|slot| slot.sender.max_capacity() - slot.sender.capacity())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(
        &self,
        queue: &str,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        let sender = self.inner.with_slot(queue, |slot| slot.sender.clone())?;

        match sender.try_send(RawMessage::new(queue, message_type, payload)) {
            Ok(()) => {
                trace!(queue, %message_type, "message published");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(queue, "queue full, rejecting message");
                Err(BusError::QueueFull {
                    queue: queue.to_string(),
                    capacity: self.inner.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    fn subscribe(&self, queue: &str) -> BusResult<MessageStream> {
        let receiver = self
            .inner
            .with_slot(queue, |slot| slot.receiver.take())?
            .ok_or_else(|| BusError::AlreadySubscribed(queue.to_string()))?;

        debug!(queue, "subscribed");

        Ok(Box::pin(MemorySubscription {
            queue: queue.to_string(),
            receiver: Some(receiver),
            bus: Arc::downgrade(&self.inner),
        }))
    }

    fn close(&self) {
        let mut queues = self.inner.queues.lock();
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the senders ends every subscription once it has drained
        let drained = std::mem::take(&mut *queues);
        drop(queues);
        debug!(queues = drained.len(), "event bus closed");
    }
}

/// A live subscription; returns its queue to the bus when dropped
struct MemorySubscription {
    queue: String,
    receiver: Option<mpsc::Receiver<RawMessage>>,
    bus: Weak<BusInner>,
}

impl Stream for MemorySubscription {
    type Item = RawMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let (Some(receiver), Some(bus)) = (self.receiver.take(), self.bus.upgrade()) else {
            return;
        };

        if let Some(slot) = bus.queues.lock().get_mut(&self.queue) {
            slot.receiver = Some(receiver);
            debug!(queue = %self.queue, "subscription released");
        }
    }
}
