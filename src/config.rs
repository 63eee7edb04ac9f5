use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::trace;

use crate::storage::ServerRegistration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Metric samples older than this are deleted by the retention task
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./liveness.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Servers registered at startup
    pub servers: Vec<ServerConfig>,

    pub storage: StorageConfig,

    pub monitoring: MonitoringConfig,

    pub bus: BusConfig,

    pub scheduler: SchedulerConfig,

    pub report: ReportConfig,

    pub api: ApiSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    pub server_id: String,

    #[serde(default)]
    pub address: String,

    /// Expected heartbeat period in seconds
    #[serde(default = "default_interval")]
    pub interval: u32,
}

impl ServerConfig {
    pub fn registration(&self) -> ServerRegistration {
        ServerRegistration {
            server_id: self.server_id.clone(),
            address: self.address.clone(),
            interval_seconds: self.interval,
        }
    }
}

fn default_interval() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// A server is OFF once `interval × grace_multiplier` passes without a heartbeat
    pub grace_multiplier: f64,

    /// Seconds between passes of the worker's own ticker.
    /// Unset means the scheduler's `interval-check-status` task owns the tick.
    pub tick_interval: Option<u64>,

    /// Seconds allowed for each store call of a pass
    pub store_timeout: u64,

    /// Records checked concurrently within one pass
    pub max_concurrency: usize,
}

impl MonitoringConfig {
    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval.map(Duration::from_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            grace_multiplier: 2.0,
            tick_interval: None,
            store_timeout: 5,
            max_concurrency: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub status_queue: String,

    pub metrics_queue: String,

    /// Undelivered messages a queue holds before publishes are rejected
    pub capacity: usize,

    /// Seconds a handler may take per message
    pub handler_timeout: u64,
}

impl BusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            status_queue: "server.status".to_string(),
            metrics_queue: "server.metrics".to_string(),
            capacity: 1024,
            handler_timeout: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    /// Cron expression with seconds, an `@daily`-style macro, or `@every 10s`
    pub schedule: String,
}

impl TaskConfig {
    fn new(name: &str, schedule: &str) -> Self {
        Self {
            name: name.to_string(),
            schedule: schedule.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds a single task invocation may run
    pub task_timeout: u64,

    pub interval_check_status: TaskConfig,

    pub daily_report: TaskConfig,

    /// Only registered when the storage backend sets a retention period
    pub metrics_retention: TaskConfig,
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_timeout: 300,
            interval_check_status: TaskConfig::new("interval-check-status", "@every 10s"),
            daily_report: TaskConfig::new("daily-report", "0 0 1 * * *"),
            metrics_retention: TaskConfig::new("metrics-retention", "0 30 2 * * *"),
        }
    }
}

/// Where daily reports are delivered
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReportSinkConfig {
    #[default]
    Log,

    /// One `report-YYYY-MM-DD.json` per day
    File { directory: PathBuf },

    /// POST the report as JSON
    Webhook { url: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub sink: ReportSinkConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Address of the ops API; unset disables it
    pub bind: Option<SocketAddr>,

    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: None,
            enable_cors: true,
        }
    }
}

impl Config {
    /// Reject values that would make the pipeline misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.server_id.trim().is_empty() {
                return invalid("server_id must not be empty".to_string());
            }
            if server.interval == 0 {
                return invalid(format!(
                    "server '{}': interval must be positive",
                    server.server_id
                ));
            }
            if !seen.insert(server.server_id.as_str()) {
                return invalid(format!("server '{}' listed twice", server.server_id));
            }
        }

        let monitoring = &self.monitoring;
        if !monitoring.grace_multiplier.is_finite() || monitoring.grace_multiplier <= 0.0 {
            return invalid(format!(
                "grace_multiplier must be positive, got {}",
                monitoring.grace_multiplier
            ));
        }
        if monitoring.tick_interval == Some(0) {
            return invalid("monitoring.tick_interval must be positive".to_string());
        }
        if monitoring.store_timeout == 0 || monitoring.max_concurrency == 0 {
            return invalid(
                "monitoring.store_timeout and max_concurrency must be positive".to_string(),
            );
        }

        let bus = &self.bus;
        if bus.status_queue.trim().is_empty() || bus.metrics_queue.trim().is_empty() {
            return invalid("queue names must not be empty".to_string());
        }
        if bus.status_queue == bus.metrics_queue {
            return invalid(format!(
                "status and metrics queues must differ, both are '{}'",
                bus.status_queue
            ));
        }
        if bus.capacity == 0 || bus.handler_timeout == 0 {
            return invalid("bus.capacity and handler_timeout must be positive".to_string());
        }

        let scheduler = &self.scheduler;
        if scheduler.task_timeout == 0 {
            return invalid("scheduler.task_timeout must be positive".to_string());
        }
        for task in [
            &scheduler.interval_check_status,
            &scheduler.daily_report,
            &scheduler.metrics_retention,
        ] {
            if task.name.trim().is_empty() {
                return invalid("task names must not be empty".to_string());
            }
        }

        Ok(())
    }
}

/// Load and validate a JSON configuration file
pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: Config = serde_json::from_str(&file_content)?;
    config.validate()?;

    trace!("loaded config: {config:?}");
    Ok(config)
}
