//! SQLite-backed execution history using sqlx.

use std::str::FromStr;

use {
    async_trait::async_trait,
    chrono::{DateTime, SecondsFormat, Utc},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
};

use crate::{
    Error, Result,
    stats::{round2, success_rate},
    store::{ExecutionId, ExecutionStore, INTERRUPTED_MESSAGE},
    types::{
        Completion, ExecutionFilter, ExecutionRecord, ExecutionStart, ExecutionStatus,
        ExecutionSummary,
    },
};

const SELECT_COLUMNS: &str = "SELECT id, job_name, category, started_at, completed_at, status, \
     duration_seconds, error_message, error_detail, metadata FROM job_executions";

/// Persistent execution history in a `job_executions` table.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and run migrations.
    ///
    /// For a pool shared with other tables use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each connection to `:memory:` is a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width RFC 3339 so text comparison orders chronologically.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::external(format!("invalid timestamp '{raw}'"), e))
}

fn record_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
    let status: String = row.try_get("status")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        job_name: row.try_get("job_name")?,
        category: row.try_get("category")?,
        started_at: parse_ts(&row.try_get::<String, _>("started_at")?)?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        status: status.parse().map_err(Error::message)?,
        duration_seconds: row.try_get("duration_seconds")?,
        error_message: row.try_get("error_message")?,
        error_detail: row.try_get("error_detail")?,
        metadata: metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn start(&self, start: &ExecutionStart) -> Result<ExecutionId> {
        let metadata = start
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            "INSERT INTO job_executions (job_name, category, started_at, status, metadata)
             VALUES (?, ?, ?, 'running', ?)",
        )
        .bind(&start.job_name)
        .bind(start.category.as_str())
        .bind(ts(start.started_at))
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn complete(&self, id: ExecutionId, completion: &Completion) -> Result<()> {
        let patch = completion
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            "UPDATE job_executions
             SET completed_at = ?, status = ?, duration_seconds = ?,
                 error_message = ?, error_detail = ?,
                 metadata = CASE
                     WHEN ?6 IS NULL THEN metadata
                     ELSE json_patch(COALESCE(metadata, '{}'), ?6)
                 END
             WHERE id = ?7",
        )
        .bind(ts(completion.completed_at))
        .bind(completion.status.as_str())
        .bind(completion.duration_seconds)
        .bind(&completion.error_message)
        .bind(&completion.error_detail)
        .bind(patch)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::message(format!("execution not found: {id}")));
        }
        Ok(())
    }

    async fn recent(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR job_name = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY started_at DESC, id DESC
             LIMIT ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.job_name.as_deref())
            .bind(filter.status.map(ExecutionStatus::as_str))
            .bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn failed_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE status = 'failed' AND started_at >= ?
             ORDER BY started_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(ts(since))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn summary(&self, job_name: &str, since: DateTime<Utc>) -> Result<ExecutionSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_runs,
                    COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS successful_runs,
                    AVG(duration_seconds) AS avg_duration,
                    MAX(duration_seconds) AS max_duration,
                    MIN(duration_seconds) AS min_duration
             FROM job_executions
             WHERE job_name = ? AND started_at >= ?",
        )
        .bind(job_name)
        .bind(ts(since))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total_runs")?;
        let successful: i64 = row.try_get("successful_runs")?;
        let (total, successful) = (total.max(0) as u64, successful.max(0) as u64);
        let avg: Option<f64> = row.try_get("avg_duration")?;
        Ok(ExecutionSummary {
            job_name: job_name.to_string(),
            total_runs: total,
            successful_runs: successful,
            success_rate: success_rate(successful, total),
            avg_duration: avg.map(round2),
            max_duration: row.try_get("max_duration")?,
            min_duration: row.try_get("min_duration")?,
        })
    }

    async fn mark_interrupted(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_executions
             SET status = 'interrupted', completed_at = ?1, error_message = ?2
             WHERE status = 'running' AND started_at < ?1",
        )
        .bind(ts(before))
        .bind(INTERRUPTED_MESSAGE)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_executions WHERE status != 'running' AND started_at < ?",
        )
        .bind(ts(before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
