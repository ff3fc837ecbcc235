//! libSQL job store — the durable queue backend.
//!
//! One connection is opened at startup and reused for every operation,
//! which serializes writes; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use. Every mutation is a single statement, and
//! status transitions carry their legality guard in the `WHERE` clause so
//! an illegal transition affects zero rows instead of corrupting state.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::job::{Job, JobKind, JobStatus};
use crate::queue::traits::{JobStore, QueueStats};

const JOB_COLUMNS: &str =
    "id, kind, status, payload, result, created_at, updated_at, retry_count, error_message";

/// Durable job queue backed by a local libSQL database.
pub struct LibSqlJobStore {
    conn: Connection,
}

impl LibSqlJobStore {
    /// Open (or create) the database file and initialize the schema.
    pub async fn open(path: &Path) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QueueError::Open(format!("Failed to create data directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| QueueError::Open(format!("Failed to open job database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| QueueError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self { conn };
        store.init_schema().await?;
        info!(path = %path.display(), "Job database opened");
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub async fn open_memory() -> Result<Self, QueueError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| QueueError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| QueueError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), QueueError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    status TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    result TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);",
            )
            .await
            .map_err(|e| QueueError::Open(format!("Schema initialization failed: {e}")))?;
        Ok(())
    }

    /// SQL fragment listing the statuses allowed to precede `target`.
    ///
    /// Keeping the guard inside the UPDATE statement makes the transition
    /// check and the write one atomic operation.
    fn allowed_prior(target: JobStatus) -> &'static str {
        match target {
            JobStatus::Running => "('PENDING')",
            JobStatus::Completed | JobStatus::Failed => "('RUNNING')",
            JobStatus::Cancelled => "('PENDING', 'RUNNING')",
            // Nothing sets PENDING after insert; no status matches, so
            // such an update affects zero rows.
            JobStatus::Pending => "('')",
        }
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a row (in `JOB_COLUMNS` order) to a `Job`.
fn row_to_job(row: &libsql::Row) -> Result<Job, QueueError> {
    let id_str: String = row.get(0).map_err(|e| QueueError::Query(e.to_string()))?;
    let kind_str: String = row.get(1).map_err(|e| QueueError::Query(e.to_string()))?;
    let status_str: String = row.get(2).map_err(|e| QueueError::Query(e.to_string()))?;
    let payload_str: String = row.get(3).map_err(|e| QueueError::Query(e.to_string()))?;
    let result_str: Option<String> = row.get(4).ok();
    let created_str: String = row.get(5).map_err(|e| QueueError::Query(e.to_string()))?;
    let updated_str: String = row.get(6).map_err(|e| QueueError::Query(e.to_string()))?;
    let retry_count: i64 = row.get(7).unwrap_or(0);
    let error_message: Option<String> = row.get(8).ok();

    Ok(Job {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        kind: JobKind::from_str(&kind_str).map_err(QueueError::Query)?,
        status: JobStatus::from_str(&status_str).map_err(QueueError::Query)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        retry_count: retry_count.max(0) as u32,
        error_message,
    })
}

#[async_trait]
impl JobStore for LibSqlJobStore {
    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Job, QueueError> {
        let job = Job::new(kind, payload);
        let payload_text = serde_json::to_string(&job.payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO jobs (id, kind, status, payload, created_at, updated_at, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                params![
                    job.id.to_string(),
                    job.kind.as_str(),
                    job.status.as_str(),
                    payload_text,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        debug!(job_id = %job.id, kind = %job.kind, "Job enqueued");
        Ok(job)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let result_text = match &result {
            Some(value) => Some(
                serde_json::to_string(value)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        let sql = format!(
            "UPDATE jobs SET status = ?2, updated_at = ?3,
                 result = COALESCE(?4, result),
                 error_message = ?5
             WHERE id = ?1 AND status IN {}",
            Self::allowed_prior(status)
        );

        let affected = self
            .conn
            .execute(
                &sql,
                params![
                    id.to_string(),
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                    result_text,
                    error,
                ],
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        if affected == 0 {
            return match self.get(id).await? {
                Some(job) => Err(QueueError::InvalidTransition {
                    id,
                    from: job.status.to_string(),
                    to: status.to_string(),
                }),
                None => Err(QueueError::NotFound(id)),
            };
        }

        debug!(job_id = %id, status = %status, "Job status updated");
        Ok(())
    }

    async fn record_retry(&self, id: Uuid) -> Result<(), QueueError> {
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET retry_count = retry_count + 1, updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        if affected == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn pending_or_running(&self) -> Result<Vec<Job>, QueueError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE status IN ('PENDING', 'RUNNING')
                     ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Job>, QueueError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ),
                params![limit as i64, offset as i64],
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let deleted = self
            .conn
            .execute(
                "DELETE FROM jobs
                 WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED') AND updated_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;

        if deleted > 0 {
            info!(deleted, "Purged expired jobs");
        }
        Ok(deleted)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();

        let mut rows = self
            .conn
            .query("SELECT status, COUNT(*) FROM jobs GROUP BY status", ())
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?
        {
            let status: String = row.get(0).map_err(|e| QueueError::Query(e.to_string()))?;
            let count: i64 = row.get(1).map_err(|e| QueueError::Query(e.to_string()))?;
            stats.total += count.max(0) as u64;
            stats.by_status.insert(status, count.max(0) as u64);
        }

        let mut rows = self
            .conn
            .query("SELECT kind, COUNT(*) FROM jobs GROUP BY kind", ())
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?
        {
            let kind: String = row.get(0).map_err(|e| QueueError::Query(e.to_string()))?;
            let count: i64 = row.get(1).map_err(|e| QueueError::Query(e.to_string()))?;
            stats.by_kind.insert(kind, count.max(0) as u64);
        }

        let mut rows = self
            .conn
            .query("SELECT MIN(created_at), MAX(created_at) FROM jobs", ())
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?;
        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| QueueError::Query(e.to_string()))?
        {
            let oldest: Option<String> = row.get(0).ok();
            let newest: Option<String> = row.get(1).ok();
            stats.oldest = oldest.as_deref().map(parse_datetime);
            stats.newest = newest.as_deref().map(parse_datetime);
        }

        Ok(stats)
    }

    fn is_durable(&self) -> bool {
        true
    }
}
