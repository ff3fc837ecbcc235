//! In-memory job store — the degraded fallback when the durable backend
//! cannot be opened. Same contract, no durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::job::{Job, JobKind, JobStatus};
use crate::queue::traits::{JobStore, QueueStats};

/// Non-durable job store over a single guarded map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Result<Job, QueueError> {
        let job = Job::new(kind, payload);
        self.jobs.write().await.insert(job.id, job.clone());
        debug!(job_id = %job.id, kind = %job.kind, "Job enqueued (memory)");
        Ok(job)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if !job.status.can_transition_to(status) {
            return Err(QueueError::InvalidTransition {
                id,
                from: job.status.to_string(),
                to: status.to_string(),
            });
        }

        job.status = status;
        job.updated_at = Utc::now();
        if result.is_some() {
            job.result = result;
        }
        job.error_message = error;
        Ok(())
    }

    async fn record_retry(&self, id: Uuid) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        job.retry_count += 1;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn pending_or_running(&self) -> Result<Vec<Job>, QueueError> {
        let jobs = self.jobs.read().await;
        let mut live: Vec<Job> = jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect();
        live.sort_by_key(|j| j.created_at);
        Ok(live)
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Job>, QueueError> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn purge_older_than(&self, days: u32) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, j| !(j.status.is_terminal() && j.updated_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats {
            total: jobs.len() as u64,
            ..Default::default()
        };
        for job in jobs.values() {
            *stats
                .by_status
                .entry(job.status.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_kind
                .entry(job.kind.as_str().to_string())
                .or_insert(0) += 1;
            stats.oldest = Some(match stats.oldest {
                Some(t) if t <= job.created_at => t,
                _ => job.created_at,
            });
            stats.newest = Some(match stats.newest {
                Some(t) if t >= job.created_at => t,
                _ => job.created_at,
            });
        }
        Ok(stats)
    }

    fn is_durable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn same_contract_as_durable_store() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(JobKind::Chat, json!({})).await.unwrap();

        store
            .set_status(job.id, JobStatus::Running, None, None)
            .await
            .unwrap();
        store
            .set_status(job.id, JobStatus::Completed, Some(json!("ok")), None)
            .await
            .unwrap();

        let err = store
            .set_status(job.id, JobStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
        assert!(!store.is_durable());
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_corrupt() {
        let store = std::sync::Arc::new(MemoryJobStore::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let job = store.enqueue(JobKind::Chat, json!({"n": i})).await.unwrap();
                store
                    .set_status(job.id, JobStatus::Running, None, None)
                    .await
                    .unwrap();
                store
                    .set_status(job.id, JobStatus::Completed, None, None)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 16);
        assert_eq!(stats.by_status.get("COMPLETED"), Some(&16));
    }

    #[tokio::test]
    async fn purge_retains_live_jobs() {
        let store = MemoryJobStore::new();
        store.enqueue(JobKind::Chat, json!({})).await.unwrap();
        let deleted = store.purge_older_than(0).await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }
}
