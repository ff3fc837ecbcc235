//! Persistent job queue.
//!
//! One durable libSQL-backed store per process, injected as
//! `Arc<dyn JobStore>` into the dispatcher and workers. When the durable
//! backend cannot be opened the queue degrades to an in-memory map so the
//! rest of the system keeps running; the degradation is logged, never
//! silent.

pub mod job;
pub mod libsql_backend;
pub mod memory;
pub mod traits;

use std::path::Path;
use std::sync::Arc;

pub use job::{Job, JobKind, JobStatus};
pub use libsql_backend::LibSqlJobStore;
pub use memory::MemoryJobStore;
pub use traits::{JobStore, QueueStats};

/// Open the durable job store, falling back to the in-memory backend if
/// the database cannot be opened.
pub async fn open_or_fallback(path: &Path) -> Arc<dyn JobStore> {
    match LibSqlJobStore::open(path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Durable job store unavailable, running non-durable in-memory queue"
            );
            Arc::new(MemoryJobStore::new())
        }
    }
}
