//! SQLite-backed job store.
//!
//! The store is synchronous like every [`JobStore`], and bridges to sqlx by
//! blocking on the runtime handle captured at connect time. Call it from
//! plain threads or `spawn_blocking`, never from inside an async task.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`),
//! so string comparison in SQL matches chronological order.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, instrument};

use taskforge_core::JobId;
use taskforge_jobs::record::CANCELLED_ERROR;
use taskforge_jobs::{Job, JobPayload, JobStats, JobStatus};

use super::store::{JobStore, JobStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT    NOT NULL,
    payload      TEXT    NOT NULL DEFAULT '{}',
    status       TEXT    NOT NULL DEFAULT 'pending',
    attempts     INTEGER NOT NULL DEFAULT 0,
    result       TEXT,
    error        TEXT,
    elapsed_ms   REAL,
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    processed_at TEXT
)
"#;

const INDEX: &str = "CREATE INDEX IF NOT EXISTS jobs_status_created_at ON jobs (status, created_at)";

const COLUMNS: &str =
    "id, name, payload, status, attempts, result, error, elapsed_ms, created_at, updated_at, processed_at";

/// Job store over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqlJobStore {
    pool: SqlitePool,
    handle: Handle,
}

impl SqlJobStore {
    /// Connect to `url` and create the schema if needed.
    ///
    /// Must run inside a multi-threaded tokio runtime; that runtime's handle
    /// drives every later call.
    pub async fn connect(url: &str) -> Result<Self, JobStoreError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| JobStoreError::Connection(format!("invalid database url {url}: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens its own database.
        let max_connections = if in_memory { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool, Handle::current());
        store.migrate().await?;
        info!(url = %url, "job store ready");
        Ok(store)
    }

    /// Connect using `runtime`, from outside of it.
    pub fn open(runtime: &Runtime, url: &str) -> Result<Self, JobStoreError> {
        runtime.block_on(Self::connect(url))
    }

    pub fn new(pool: SqlitePool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_schema", e))?;
        sqlx::query(INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;
        Ok(())
    }

    async fn fetch(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| JobRow::from_row(&r).and_then(Job::try_from)).transpose()
    }

    #[instrument(skip(self, payload), err)]
    async fn push_async(&self, name: &str, payload: JobPayload) -> Result<Job, JobStoreError> {
        let now = Utc::now();
        let encoded = serde_json::to_string(&payload).map_err(|e| JobStoreError::Serialization(e.to_string()))?;

        let id: i64 = sqlx::query(
            "INSERT INTO jobs (name, payload, status, attempts, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?)
             RETURNING id",
        )
        .bind(name)
        .bind(encoded)
        .bind(timestamp(now))
        .bind(timestamp(now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("push", e))?
        .try_get("id")
        .map_err(|e| map_sqlx_error("push", e))?;

        debug!(job_id = id, name = %name, "job queued");
        self.fetch(JobId::new(id))
            .await?
            .ok_or(JobStoreError::NotFound(JobId::new(id)))
    }

    async fn list_async(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?"))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter()
            .map(|r| JobRow::from_row(r).and_then(Job::try_from))
            .collect()
    }

    async fn claim_async(&self) -> Result<Option<Job>, JobStoreError> {
        let candidate: Option<i64> = sqlx::query(
            "SELECT id FROM jobs WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_select", e))?
        .map(|row| row.try_get("id"))
        .transpose()
        .map_err(|e| map_sqlx_error("claim_select", e))?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = sqlx::query(
            "UPDATE jobs SET status = 'processing', attempts = attempts + 1, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_update", e))?
        .rows_affected();

        if claimed == 0 {
            debug!(job_id = id, "claim lost to another worker");
            return Ok(None);
        }
        self.fetch(JobId::new(id)).await
    }

    async fn finish_async(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
        error: Option<&str>,
        elapsed_ms: Option<f64>,
    ) -> Result<bool, JobStoreError> {
        let now = timestamp(Utc::now());
        let affected = sqlx::query(
            "UPDATE jobs SET status = ?, result = ?, error = ?, elapsed_ms = ?, updated_at = ?, processed_at = ?
             WHERE id = ? AND status = 'processing'",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .bind(elapsed_ms)
        .bind(&now)
        .bind(&now)
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish", e))?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn cancel_async(&self, id: JobId) -> Result<bool, JobStoreError> {
        let now = timestamp(Utc::now());
        let affected = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, updated_at = ?, processed_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(CANCELLED_ERROR)
        .bind(&now)
        .bind(&now)
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("cancel", e))?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn purge_async(&self, older_than_days: u32) -> Result<u64, JobStoreError> {
        let result = if older_than_days == 0 {
            sqlx::query("DELETE FROM jobs WHERE status IN ('done', 'failed')")
                .execute(&self.pool)
                .await
        } else {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
            sqlx::query("DELETE FROM jobs WHERE status IN ('done', 'failed') AND created_at < ?")
                .bind(timestamp(cutoff))
                .execute(&self.pool)
                .await
        }
        .map_err(|e| map_sqlx_error("purge", e))?;

        info!(older_than_days, deleted = result.rows_affected(), "purged jobs");
        Ok(result.rows_affected())
    }

    async fn stats_async(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("stats", e))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| JobStoreError::Serialization(e.to_string()))?;
            stats.record(status, total as u64);
        }
        Ok(stats)
    }
}

impl JobStore for SqlJobStore {
    fn push(&self, name: &str, payload: JobPayload) -> Result<Job, JobStoreError> {
        self.handle.block_on(self.push_async(name, payload))
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.handle.block_on(self.fetch(id))
    }

    fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        self.handle.block_on(self.list_async(status, limit))
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        self.handle.block_on(self.claim_async())
    }

    fn complete(&self, id: JobId, result: &Value, elapsed_ms: f64) -> Result<bool, JobStoreError> {
        let encoded = serde_json::to_string(result).map_err(|e| JobStoreError::Serialization(e.to_string()))?;
        self.handle
            .block_on(self.finish_async(id, JobStatus::Done, Some(encoded), None, Some(elapsed_ms)))
    }

    fn fail(&self, id: JobId, error: &str, elapsed_ms: Option<f64>) -> Result<bool, JobStoreError> {
        self.handle
            .block_on(self.finish_async(id, JobStatus::Failed, None, Some(error), elapsed_ms))
    }

    fn cancel(&self, id: JobId) -> Result<bool, JobStoreError> {
        self.handle.block_on(self.cancel_async(id))
    }

    fn purge(&self, older_than_days: u32) -> Result<u64, JobStoreError> {
        self.handle.block_on(self.purge_async(older_than_days))
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.handle.block_on(self.stats_async())
    }
}

/// Fixed-width text form of a timestamp.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, text: &str) -> Result<DateTime<Utc>, JobStoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| JobStoreError::Serialization(format!("bad {column} `{text}`: {e}")))
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            JobStoreError::Connection(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => JobStoreError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            JobStoreError::Serialization(format!("bad row in {operation}: {err}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: i64,
    name: String,
    payload: String,
    status: String,
    attempts: i64,
    result: Option<String>,
    error: Option<String>,
    elapsed_ms: Option<f64>,
    created_at: String,
    updated_at: String,
    processed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &SqliteRow) -> Result<Self, JobStoreError> {
        let decode = |e| map_sqlx_error("decode_row", e);
        Ok(JobRow {
            id: row.try_get("id").map_err(decode)?,
            name: row.try_get("name").map_err(decode)?,
            payload: row.try_get("payload").map_err(decode)?,
            status: row.try_get("status").map_err(decode)?,
            attempts: row.try_get("attempts").map_err(decode)?,
            result: row.try_get("result").map_err(decode)?,
            error: row.try_get("error").map_err(decode)?,
            elapsed_ms: row.try_get("elapsed_ms").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
            processed_at: row.try_get("processed_at").map_err(decode)?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let serialization = |e: serde_json::Error| JobStoreError::Serialization(e.to_string());
        Ok(Job {
            id: JobId::new(row.id),
            name: row.name,
            payload: serde_json::from_str(&row.payload).map_err(serialization)?,
            status: row
                .status
                .parse()
                .map_err(|e: taskforge_core::DomainError| JobStoreError::Serialization(e.to_string()))?,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            result: row
                .result
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(serialization)?,
            error: row.error,
            elapsed_ms: row.elapsed_ms,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            processed_at: row
                .processed_at
                .as_deref()
                .map(|t| parse_timestamp("processed_at", t))
                .transpose()?,
        })
    }
}
