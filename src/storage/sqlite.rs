//! SQLite Status Store implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (the API) never block on writers (handlers, worker)
//! - **Row-level compare-and-set**: every mutation starts with a single
//!   conditional `UPDATE`, so the write lock is taken before any read and
//!   concurrent writers serialize on SQLite's busy timeout instead of failing
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    HeartbeatOutcome, MetricSample, ServerRecord, ServerRegistration, StatusTransition,
};
use crate::ServerStatus;

const SERVER_COLUMNS: &str =
    "server_id, address, interval_seconds, status, last_seen, status_changed_at";

/// SQLite-backed Status Store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use server_liveness::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./status.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite status store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("status store ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_status(value: &str) -> StorageResult<ServerStatus> {
        ServerStatus::from_str(value).map_err(StorageError::SerializationError)
    }

    fn row_to_record(row: &SqliteRow) -> StorageResult<ServerRecord> {
        let status: String = row.get("status");

        Ok(ServerRecord {
            server_id: row.get("server_id"),
            address: row.get("address"),
            interval_seconds: row.get::<i64, _>("interval_seconds") as u32,
            status: Self::parse_status(&status)?,
            last_seen: row
                .get::<Option<i64>, _>("last_seen")
                .map(Self::millis_to_timestamp),
            status_changed_at: row
                .get::<Option<i64>, _>("status_changed_at")
                .map(Self::millis_to_timestamp),
        })
    }

    fn row_to_transition(row: &SqliteRow) -> StorageResult<StatusTransition> {
        let from: String = row.get("from_status");
        let to: String = row.get("to_status");

        Ok(StatusTransition {
            server_id: row.get("server_id"),
            from: Self::parse_status(&from)?,
            to: Self::parse_status(&to)?,
            at: Self::millis_to_timestamp(row.get("at")),
        })
    }

    async fn insert_transition(
        tx: &mut Transaction<'_, Sqlite>,
        server_id: &str,
        from: ServerStatus,
        to: ServerStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO status_transitions (server_id, from_status, to_status, at) VALUES (?, ?, ?, ?)",
        )
        .bind(server_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Self::timestamp_to_millis(&at))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    #[instrument(skip(self, registration), fields(server_id = %registration.server_id))]
    async fn register_server(&self, registration: ServerRegistration) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO servers (server_id, address, interval_seconds, status)
            VALUES (?, ?, ?, 'UNDEFINED')
            ON CONFLICT (server_id) DO UPDATE SET
                address = excluded.address,
                interval_seconds = excluded.interval_seconds
            "#,
        )
        .bind(&registration.server_id)
        .bind(&registration.address)
        .bind(registration.interval_seconds as i64)
        .execute(&self.pool)
        .await?;

        debug!("server registered");
        Ok(())
    }

    async fn get_server(&self, server_id: &str) -> StorageResult<Option<ServerRecord>> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE server_id = ?");

        let row = sqlx::query(&sql)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn record_heartbeat(
        &self,
        server_id: &str,
        timestamp: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> StorageResult<HeartbeatOutcome> {
        let millis = Self::timestamp_to_millis(&timestamp);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE servers SET last_seen = MAX(COALESCE(last_seen, ?), ?) WHERE server_id = ?",
        )
        .bind(millis)
        .bind(millis)
        .bind(server_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::UnknownServer(server_id.to_string()));
        }

        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE server_id = ?");
        let row = sqlx::query(&sql)
            .bind(server_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut record = Self::row_to_record(&row)?;
        let previous_status = record.status;

        if previous_status != ServerStatus::On {
            // Never stamp a change before the one it replaces
            let at = record
                .status_changed_at
                .map_or(received_at, |changed| changed.max(received_at));
            let at_millis = Self::timestamp_to_millis(&at);

            sqlx::query(
                "UPDATE servers SET status = 'ON', status_changed_at = ? WHERE server_id = ?",
            )
            .bind(at_millis)
            .bind(server_id)
            .execute(&mut *tx)
            .await?;

            Self::insert_transition(&mut tx, server_id, previous_status, ServerStatus::On, at)
                .await?;

            record.status = ServerStatus::On;
            record.status_changed_at = Some(Self::millis_to_timestamp(at_millis));
        }

        tx.commit().await?;

        trace!("heartbeat applied");
        Ok(HeartbeatOutcome {
            previous_status,
            record,
        })
    }

    #[instrument(skip(self))]
    async fn demote_if_stale(
        &self,
        server_id: &str,
        seen_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE servers SET status = 'OFF', status_changed_at = ?
            WHERE server_id = ? AND status = 'ON' AND last_seen IS NOT NULL AND last_seen < ?
            "#,
        )
        .bind(Self::timestamp_to_millis(&now))
        .bind(server_id)
        .bind(Self::timestamp_to_millis(&seen_before))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM servers WHERE server_id = ?")
                .bind(server_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;

            return if exists {
                Ok(false)
            } else {
                Err(StorageError::UnknownServer(server_id.to_string()))
            };
        }

        Self::insert_transition(&mut tx, server_id, ServerStatus::On, ServerStatus::Off, now)
            .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn insert_sample(&self, sample: MetricSample) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_samples (server_id, timestamp, cpu, ram, disk)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (server_id, timestamp) DO UPDATE SET
                cpu = excluded.cpu,
                ram = excluded.ram,
                disk = excluded.disk
            "#,
        )
        .bind(&sample.server_id)
        .bind(Self::timestamp_to_millis(&sample.timestamp))
        .bind(sample.cpu)
        .bind(sample.ram)
        .bind(sample.disk)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_latest_samples(
        &self,
        server_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricSample>> {
        let rows = sqlx::query(
            r#"
            SELECT server_id, timestamp, cpu, ram, disk
            FROM metric_samples
            WHERE server_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(server_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut samples: Vec<MetricSample> = rows
            .iter()
            .map(|row| MetricSample {
                server_id: row.get("server_id"),
                timestamp: Self::millis_to_timestamp(row.get("timestamp")),
                cpu: row.get("cpu"),
                ram: row.get("ram"),
                disk: row.get("disk"),
            })
            .collect();

        // Oldest first
        samples.reverse();
        Ok(samples)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metric_samples WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old metric samples", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_transitions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let millis = Self::timestamp_to_millis(&before);
        let result = sqlx::query(
            r#"
            DELETE FROM status_transitions
            WHERE at < ?
              AND id NOT IN (
                  SELECT MAX(id) FROM status_transitions
                  WHERE at < ?
                  GROUP BY server_id
              )
            "#,
        )
        .bind(millis)
        .bind(millis)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old status transitions", deleted);

        Ok(deleted)
    }

    async fn transitions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<StatusTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT server_id, from_status, to_status, at
            FROM status_transitions
            WHERE at >= ? AND at < ?
            ORDER BY at ASC, id ASC
            "#,
        )
        .bind(Self::timestamp_to_millis(&start))
        .bind(Self::timestamp_to_millis(&end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_transition).collect()
    }

    async fn last_transition_before(
        &self,
        server_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<StatusTransition>> {
        let row = sqlx::query(
            r#"
            SELECT server_id, from_status, to_status, at
            FROM status_transitions
            WHERE server_id = ? AND at < ?
            ORDER BY at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(server_id)
        .bind(Self::timestamp_to_millis(&at))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_transition).transpose()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT COUNT(*) FROM servers")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => {
                let servers: i64 = row.get(0);
                let metadata = HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                    ("servers".to_string(), servers.to_string()),
                ]);

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite status store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite status store");
        self.pool.close().await;
        Ok(())
    }
}
