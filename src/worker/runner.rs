//! Worker boundary — spawns a job's worker and owns its terminal
//! outcome.
//!
//! Nothing a worker does may terminate the process: errors, panics and
//! timeouts are all converted here into a FAILED status and an error
//! event. Exactly one terminal event is published per job, and the
//! worker's handle is removed from the active table when the run ends.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatch::{NormalizedInput, StrategyContext};
use crate::error::WorkerError;
use crate::events::JobOutcome;
use crate::queue::{Job, JobKind, JobStatus};
use crate::worker::{CancelToken, JobContext, JobOutput, WorkerDeps, select_worker};

/// A live worker, tracked by the dispatcher's active table.
pub struct WorkerHandle {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub cancel: CancelToken,
    pub handle: JoinHandle<()>,
}

/// Active-worker table: at most one handle per job_id.
pub type WorkerTable = Arc<RwLock<HashMap<Uuid, WorkerHandle>>>;

enum RunResult {
    Output(JobOutput),
    Cancelled,
    Failed(String),
}

/// Spawn the runner task for `job`.
///
/// `persist` is false on the store-unavailable fallback path: the run
/// emits exactly the same events, it just has no durable row to update.
pub(crate) fn spawn(
    job: Job,
    input: NormalizedInput,
    strategy: StrategyContext,
    deps: WorkerDeps,
    cancel: CancelToken,
    table: WorkerTable,
    persist: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let job_id = job.id;
        let kind = job.kind;
        let mode = strategy.mode;

        // A recovered job may already be RUNNING; only fresh jobs need
        // the PENDING -> RUNNING transition.
        if persist
            && job.status == JobStatus::Pending
            && let Err(e) = deps
                .queue
                .set_status(job_id, JobStatus::Running, None, None)
                .await
        {
            warn!(job_id = %job_id, error = %e, "Failed to mark job running");
        }
        deps.bus.emit_status(format!("{kind}: started ({job_id})"));

        let ctx = JobContext {
            job_id,
            kind,
            mode,
            input,
            strategy,
            cancel: cancel.clone(),
        };

        // The worker body runs in its own task so that even a panic is
        // contained as a JoinError instead of unwinding the runner.
        let worker_deps = deps.clone();
        let mut body = tokio::spawn(async move {
            let worker = select_worker(kind, worker_deps);
            worker.run(&ctx).await
        });

        let result = tokio::select! {
            joined = &mut body => match joined {
                Ok(Ok(_)) if cancel.is_cancelled() => RunResult::Cancelled,
                Ok(Ok(output)) => RunResult::Output(output),
                Ok(Err(WorkerError::Cancelled)) => RunResult::Cancelled,
                Ok(Err(e)) => RunResult::Failed(e.to_string()),
                Err(join_err) if join_err.is_panic() => {
                    RunResult::Failed("worker panicked".to_string())
                }
                Err(_) => RunResult::Cancelled,
            },
            _ = tokio::time::sleep(deps.config.job_timeout) => {
                body.abort();
                RunResult::Failed(format!(
                    "job timed out after {:?}",
                    deps.config.job_timeout
                ))
            }
        };

        match result {
            RunResult::Output(output) => {
                if persist {
                    let result_json = serde_json::json!({
                        "content": output.content,
                        "data": output.data,
                    });
                    if let Err(e) = deps
                        .queue
                        .set_status(job_id, JobStatus::Completed, Some(result_json), None)
                        .await
                    {
                        warn!(job_id = %job_id, error = %e, "Failed to persist completion");
                    }
                }
                deps.bus.emit_status(format!("{kind}: completed ({job_id})"));
                deps.bus.emit_result(JobOutcome {
                    job_id,
                    kind,
                    mode,
                    content: output.content,
                    data: output.data,
                });
            }
            RunResult::Cancelled => {
                if persist
                    && let Err(e) = deps
                        .queue
                        .set_status(job_id, JobStatus::Cancelled, None, None)
                        .await
                {
                    debug!(job_id = %job_id, error = %e, "Cancellation not persisted");
                }
                deps.bus.emit_status(format!("{kind}: cancelled ({job_id})"));
            }
            RunResult::Failed(reason) => {
                if persist
                    && let Err(e) = deps
                        .queue
                        .set_status(job_id, JobStatus::Failed, None, Some(reason.clone()))
                        .await
                {
                    warn!(job_id = %job_id, error = %e, "Failed to persist failure");
                }
                deps.bus.emit_error(format!("{kind} job {job_id} failed: {reason}"));
            }
        }

        table.write().await.remove(&job_id);
        debug!(job_id = %job_id, "Worker handle released");
    })
}
