//! Status Store backends
//!
//! This module provides a trait-based abstraction over the durable record of
//! server liveness (plus metric samples and the status transition log).
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, one conditional `UPDATE` per mutation
//! - **In-Memory** (fallback): No persistence, per-record locks, for tests or
//!   deployments without a database
//!
//! ## Usage
//!
//! ```no_run
//! use server_liveness::storage::{StatusStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./status.db").await?;
//!     let servers = store.list_servers().await?;
//!     println!("{} servers registered", servers.len());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StatusStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{
    HeartbeatOutcome, MetricSample, ServerRecord, ServerRegistration, StatusTransition,
};

/// Open the store selected by the configuration
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn StatusStore>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory status store (no persistence)");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "sqlite backend requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}
