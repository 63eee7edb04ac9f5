//! Message handlers
//!
//! A handler turns one decoded `MonitoringEvent` into a Status Store
//! mutation. Handlers are idempotent: applying the same event twice leaves
//! the store exactly as applying it once.

use async_trait::async_trait;

use crate::storage::StorageError;
use crate::{InvalidEvent, MonitoringEvent};

pub mod metrics;
pub mod status;

pub use metrics::MetricsUpdateHandler;
pub use status::StatusUpdateHandler;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("unknown server '{0}'")]
    UnknownServer(String),

    #[error(transparent)]
    InvalidPayload(#[from] InvalidEvent),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl HandlerError {
    /// Data errors are dropped without retry; storage errors are transient
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            HandlerError::UnknownServer(_) | HandlerError::InvalidPayload(_)
        )
    }
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownServer(server_id) => HandlerError::UnknownServer(server_id),
            other => HandlerError::Storage(other),
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, event: MonitoringEvent) -> Result<(), HandlerError>;
}
