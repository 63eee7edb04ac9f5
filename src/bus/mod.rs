//! Event Bus
//!
//! Named-queue publish/subscribe carrying serialized `MonitoringEvent`s.
//!
//! ## Delivery
//!
//! - `publish` appends and returns without waiting for consumption
//!   (at-least-once). A closed bus or a full queue is reported to the caller.
//! - `subscribe` returns a lazy stream of raw messages. Only one subscriber
//!   per queue at a time; dropping the stream returns the queue to the bus so
//!   a later subscriber resumes where the previous one stopped.

use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod error;
pub mod memory;
pub mod message;
pub mod producer;

pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use message::{MessageType, RawMessage};
pub use producer::MonitoringEventProducer;

/// Stream of raw messages handed out by `EventBus::subscribe`
pub type MessageStream = BoxStream<'static, RawMessage>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append a message to `queue`
    async fn publish(
        &self,
        queue: &str,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> BusResult<()>;

    /// Take the single subscription of `queue`
    fn subscribe(&self, queue: &str) -> BusResult<MessageStream>;

    /// Reject further publishes and end every subscription once drained
    fn close(&self);
}
