use crate::InvalidEvent;

pub type BusResult<T> = Result<T, BusError>;

/// Errors reported synchronously to publishers and subscribers
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,

    /// The queue holds `capacity` undelivered messages already
    #[error("queue '{queue}' is full ({capacity} pending messages)")]
    QueueFull { queue: String, capacity: usize },

    #[error("queue '{0}' already has an active subscriber")]
    AlreadySubscribed(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidEvent(#[from] InvalidEvent),
}

impl BusError {
    /// Errors caused by the caller's payload rather than the bus itself
    pub fn is_rejected_payload(&self) -> bool {
        matches!(self, BusError::Encode(_) | BusError::InvalidEvent(_))
    }
}
