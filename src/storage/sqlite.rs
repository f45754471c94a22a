//! SQLite storage backend implementation
//!
//! One connection pool serves all four repositories.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers see the last committed master swap, never a half-applied one
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::MetricsSnapshot;

use super::backend::{AlertRepository, HostRepository, MetricsRepository, WatchListRepository};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertRule, Host, HostId, HostStatus, MetricCategory, NewAlertRule, NewHost, RuleId,
    StoredMetrics, WatchKind,
};

const HOST_COLUMNS: &str =
    "id, hostname, ip_address, agent_port, priority, is_master, status, created_at, updated_at";

const RULE_COLUMNS: &str = "id, host_id, metric_name, threshold_value, condition, enabled";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (or create) the database file and run migrations
    ///
    /// ```no_run
    /// # use fleetwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./fleetwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
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

        info!("database migrations complete");

        Ok(Self { pool })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn host_from_row(row: &SqliteRow) -> StorageResult<Host> {
        let status: String = row.try_get("status")?;
        let agent_port: i64 = row.try_get("agent_port")?;

        Ok(Host {
            id: row.try_get("id")?,
            hostname: row.try_get("hostname")?,
            ip_address: row.try_get("ip_address")?,
            agent_port: u16::try_from(agent_port).map_err(|_| {
                StorageError::SerializationError(format!("invalid agent port {agent_port}"))
            })?,
            priority: row.try_get("priority")?,
            is_master: row.try_get("is_master")?,
            status: status.parse()?,
            created_at: Self::millis_to_timestamp(row.try_get("created_at")?),
            updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
        })
    }

    fn rule_from_row(row: &SqliteRow) -> StorageResult<AlertRule> {
        Ok(AlertRule {
            id: row.try_get("id")?,
            host_id: row.try_get("host_id")?,
            metric_name: row.try_get("metric_name")?,
            threshold_value: row.try_get("threshold_value")?,
            condition: row.try_get("condition")?,
            enabled: row.try_get("enabled")?,
        })
    }
}

#[async_trait]
impl HostRepository for SqliteBackend {
    async fn get_all(&self) -> StorageResult<Vec<Host>> {
        let rows = sqlx::query(&format!("SELECT {HOST_COLUMNS} FROM hosts ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::host_from_row).collect()
    }

    async fn get_by_id(&self, id: HostId) -> StorageResult<Option<Host>> {
        let row = sqlx::query(&format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::host_from_row).transpose()
    }

    #[instrument(skip(self, host), fields(hostname = %host.hostname))]
    async fn create(&self, host: NewHost) -> StorageResult<Host> {
        let now = Utc::now();
        let millis = Self::timestamp_to_millis(&now);

        let result = sqlx::query(
            r#"
            INSERT INTO hosts (hostname, ip_address, agent_port, priority, is_master, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&host.hostname)
        .bind(&host.ip_address)
        .bind(i64::from(host.agent_port))
        .bind(host.priority)
        .bind(HostStatus::Pending.as_str())
        .bind(millis)
        .bind(millis)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, "host created");

        Ok(Host {
            id,
            hostname: host.hostname,
            ip_address: host.ip_address,
            agent_port: host.agent_port,
            priority: host.priority,
            is_master: false,
            status: HostStatus::Pending,
            created_at: Self::millis_to_timestamp(millis),
            updated_at: Self::millis_to_timestamp(millis),
        })
    }

    async fn update(&self, host: &Host) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE hosts
            SET hostname = ?, ip_address = ?, agent_port = ?, priority = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&host.hostname)
        .bind(&host.ip_address)
        .bind(i64::from(host.agent_port))
        .bind(host.priority)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(host.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::host_not_found(host.id));
        }
        Ok(())
    }

    async fn delete(&self, id: HostId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::host_not_found(id));
        }
        Ok(())
    }

    async fn update_status(&self, id: HostId, status: HostStatus) -> StorageResult<()> {
        let result = sqlx::query("UPDATE hosts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Self::timestamp_to_millis(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::host_not_found(id));
        }
        Ok(())
    }

    async fn get_master(&self) -> StorageResult<Option<Host>> {
        let row = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE is_master = 1 LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::host_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn set_master(&self, id: HostId) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        // first statement must be a write: no read snapshot before the lock
        sqlx::query("UPDATE hosts SET is_master = 0 WHERE is_master = 1")
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query("UPDATE hosts SET is_master = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(StorageError::host_not_found(id));
        }

        tx.commit().await?;

        debug!("master flag moved");
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for SqliteBackend {
    async fn get_by_host_id(&self, host_id: HostId) -> StorageResult<Vec<AlertRule>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules WHERE host_id = ? ORDER BY id"
        ))
        .bind(host_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::rule_from_row).collect()
    }

    async fn get_by_id(&self, id: RuleId) -> StorageResult<Option<AlertRule>> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::rule_from_row).transpose()
    }

    async fn create(&self, rule: NewAlertRule) -> StorageResult<AlertRule> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_rules (host_id, metric_name, threshold_value, condition, enabled)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(rule.host_id)
        .bind(&rule.metric_name)
        .bind(rule.threshold_value)
        .bind(&rule.condition)
        .bind(rule.enabled)
        .execute(&self.pool)
        .await?;

        Ok(AlertRule {
            id: result.last_insert_rowid(),
            host_id: rule.host_id,
            metric_name: rule.metric_name,
            threshold_value: rule.threshold_value,
            condition: rule.condition,
            enabled: rule.enabled,
        })
    }

    async fn update(&self, rule: &AlertRule) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE alert_rules
            SET metric_name = ?, threshold_value = ?, condition = ?, enabled = ?
            WHERE id = ?
            "#,
        )
        .bind(&rule.metric_name)
        .bind(rule.threshold_value)
        .bind(&rule.condition)
        .bind(rule.enabled)
        .bind(rule.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::rule_not_found(rule.id));
        }
        Ok(())
    }

    async fn delete(&self, id: RuleId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::rule_not_found(id));
        }
        Ok(())
    }

    async fn set_enabled(&self, id: RuleId, enabled: bool) -> StorageResult<()> {
        let result = sqlx::query("UPDATE alert_rules SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::rule_not_found(id));
        }
        Ok(())
    }
}

#[async_trait]
impl WatchListRepository for SqliteBackend {
    async fn list(&self, host_id: HostId, kind: WatchKind) -> StorageResult<Vec<String>> {
        let names: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM watch_entries WHERE host_id = ? AND kind = ? ORDER BY id",
        )
        .bind(host_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn add(&self, host_id: HostId, kind: WatchKind, name: &str) -> StorageResult<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO watch_entries (host_id, kind, name) VALUES (?, ?, ?)",
        )
        .bind(host_id)
        .bind(kind.as_str())
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::InvalidConfig(format!(
                "{kind} '{name}' already watched on host {host_id}"
            )));
        }
        Ok(())
    }

    async fn remove(&self, host_id: HostId, kind: WatchKind, name: &str) -> StorageResult<()> {
        let result =
            sqlx::query("DELETE FROM watch_entries WHERE host_id = ? AND kind = ? AND name = ?")
                .bind(host_id)
                .bind(kind.as_str())
                .bind(name)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "{kind} '{name}' on host {host_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsRepository for SqliteBackend {
    #[instrument(skip(self, snapshot), fields(host_id = snapshot.host_id, category = %category))]
    async fn save_metrics(
        &self,
        category: MetricCategory,
        snapshot: &MetricsSnapshot,
    ) -> StorageResult<()> {
        let Some(row) = StoredMetrics::from_snapshot(category, snapshot)? else {
            return Ok(());
        };

        let payload = serde_json::to_string(&row.payload)?;

        sqlx::query(&format!(
            "INSERT INTO {} (host_id, timestamp, payload) VALUES (?, ?, ?)",
            category.table_name()
        ))
        .bind(row.host_id)
        .bind(Self::timestamp_to_millis(&row.timestamp))
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_metrics_in_range(
        &self,
        category: MetricCategory,
        host_id: HostId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredMetrics>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT host_id, timestamp, payload FROM {}
            WHERE host_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
            category.table_name()
        ))
        .bind(host_id)
        .bind(Self::timestamp_to_millis(&from))
        .bind(Self::timestamp_to_millis(&to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<StoredMetrics> {
                let payload: String = row.try_get("payload")?;
                Ok(StoredMetrics {
                    host_id: row.try_get("host_id")?,
                    timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
                    category,
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_metrics(
        &self,
        category: MetricCategory,
        before: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE timestamp < ?",
            category.table_name()
        ))
        .bind(Self::timestamp_to_millis(&before))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::UnhealthyBackend(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
