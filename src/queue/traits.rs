//! The `JobStore` trait — the contract every queue backend satisfies.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::job::{Job, JobKind, JobStatus};

/// Aggregate view of the queue contents.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total: u64,
    pub by_status: HashMap<String, u64>,
    pub by_kind: HashMap<String, u64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Persistent job queue contract.
///
/// Backends must tolerate concurrent writers: every mutation is a single
/// atomic operation behind one serialized-write discipline, and the
/// status-transition table from [`JobStatus::can_transition_to`] is
/// enforced inside the mutation itself.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a fresh PENDING job and return its record.
    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Job, QueueError>;

    /// Apply a status transition, optionally recording a result or an
    /// error message. Illegal transitions return
    /// [`QueueError::InvalidTransition`] and leave the row untouched.
    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), QueueError>;

    /// Bump the retry counter (stage retries inside multi-stage jobs).
    async fn record_retry(&self, id: Uuid) -> Result<(), QueueError>;

    /// Fetch a single job.
    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Jobs left PENDING or RUNNING — the startup recovery scan,
    /// oldest first.
    async fn pending_or_running(&self) -> Result<Vec<Job>, QueueError>;

    /// Page through history, newest first.
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Job>, QueueError>;

    /// Delete terminal jobs whose last update is older than `days`.
    /// Returns the number of deleted rows.
    async fn purge_older_than(&self, days: u32) -> Result<u64, QueueError>;

    /// Aggregate counts for diagnostics.
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Whether this backend survives a restart.
    fn is_durable(&self) -> bool;
}
