//! The dispatcher — request intake, fast paths, and the active-worker
//! table.
//!
//! `dispatch` never performs the expensive external call itself: local
//! sub-millisecond modes (`kb_search`, `system_cmd`) run inline, and
//! everything else is enqueued and handed to a worker task. When the
//! durable store rejects the enqueue, the job still runs — directly
//! constructed, same events, no durability.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::KnowledgeCache;
use crate::clients::{GenerationService, ParserRegistry, WebSearch};
use crate::config::CoreConfig;
use crate::dispatch::request::{DispatchRequest, NormalizedInput, normalize};
use crate::dispatch::strategy::{GlobalStrategy, Mode, StrategyContext};
use crate::error::{ConfigError, DispatchError};
use crate::events::EventBus;
use crate::modules::ModuleSlot;
use crate::queue::{Job, JobKind, JobStatus, JobStore};
use crate::worker::runner::{self, WorkerHandle, WorkerTable};
use crate::worker::{CancelToken, WorkerDeps};
use crate::workspace::WorkspaceManager;

/// Sentinel returned by the `kb_search` fast path when nothing matches.
pub const NO_RESULTS: &str = "No matching documents in the knowledge index.";

static PURGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^purge(?:\s+(\d+))?$").expect("static regex"));

/// Collaborators and shared components injected into the dispatcher.
pub struct CoreDeps {
    pub queue: Arc<dyn JobStore>,
    pub generation: Arc<dyn GenerationService>,
    pub parsers: Arc<ParserRegistry>,
    pub web: ModuleSlot<dyn WebSearch>,
    pub cache: Arc<KnowledgeCache>,
    pub workspace: Arc<WorkspaceManager>,
    pub bus: EventBus,
}

/// What a dispatch call produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Enqueued durably; a worker is running it.
    Queued(Uuid),
    /// Store unavailable; running without persistence (same events).
    Direct(Uuid),
    /// Fast path; the result computed inline.
    Immediate(String),
}

impl DispatchOutcome {
    /// The job id, for the asynchronous outcomes.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::Queued(id) | Self::Direct(id) => Some(*id),
            Self::Immediate(_) => None,
        }
    }
}

/// Routes requests to fast paths or queued workers and owns the
/// active-worker table.
pub struct Dispatcher {
    config: CoreConfig,
    queue: Arc<dyn JobStore>,
    cache: Arc<KnowledgeCache>,
    workspace: Arc<WorkspaceManager>,
    bus: EventBus,
    worker_deps: WorkerDeps,
    workers: WorkerTable,
    current_mode: RwLock<Mode>,
    globals: RwLock<GlobalStrategy>,
}

impl Dispatcher {
    pub fn new(config: CoreConfig, deps: CoreDeps) -> Self {
        let worker_deps = WorkerDeps {
            config: config.clone(),
            generation: deps.generation,
            parsers: deps.parsers,
            web: deps.web,
            cache: Arc::clone(&deps.cache),
            workspace: Arc::clone(&deps.workspace),
            queue: Arc::clone(&deps.queue),
            bus: deps.bus.clone(),
        };
        Self {
            config,
            queue: deps.queue,
            cache: deps.cache,
            workspace: deps.workspace,
            bus: deps.bus,
            worker_deps,
            workers: Arc::new(RwLock::new(HashMap::new())),
            current_mode: RwLock::new(Mode::Chat),
            globals: RwLock::new(GlobalStrategy::default()),
        }
    }

    /// Route one request.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let mode = match request.mode {
            Some(mode) => mode,
            None => *self.current_mode.read().await,
        };
        let input = normalize(&request.payload);
        let globals = self.globals.read().await.clone();
        let strategy = StrategyContext::build(mode, &globals, &request.overrides);
        self.bus.emit_log(format!("dispatch: {mode}"));

        // Purely local modes bypass the queue entirely.
        match mode {
            Mode::KbSearch => {
                return Ok(DispatchOutcome::Immediate(self.kb_search(&input.text).await));
            }
            Mode::SystemCmd => {
                return Ok(DispatchOutcome::Immediate(self.system_cmd(&input.text).await));
            }
            _ => {}
        }

        // Contract violations are rejected here, never queued.
        if mode == Mode::Analysis && input.file.is_none() {
            return Err(DispatchError::MissingFile {
                mode: mode.to_string(),
            });
        }

        let kind = mode.job_kind().expect("queued modes map to a job kind");
        let payload = job_payload(mode, &input);

        match self.queue.enqueue(kind, payload.clone()).await {
            Ok(job) => {
                let id = job.id;
                self.launch(job, input, strategy, true).await?;
                Ok(DispatchOutcome::Queued(id))
            }
            Err(e) => {
                warn!(error = %e, "Enqueue failed, falling back to direct execution");
                self.bus.emit_log(format!(
                    "Job store unavailable ({e}); running job without persistence"
                ));
                let job = Job::new(kind, payload);
                let id = job.id;
                self.launch(job, input, strategy, false).await?;
                Ok(DispatchOutcome::Direct(id))
            }
        }
    }

    /// Register the handle and start the worker. Rejects a duplicate
    /// launch for an already-active job_id.
    async fn launch(
        &self,
        job: Job,
        input: NormalizedInput,
        strategy: StrategyContext,
        persist: bool,
    ) -> Result<(), DispatchError> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&job.id) {
            return Err(DispatchError::DuplicateJob(job.id));
        }

        let job_id = job.id;
        let kind = job.kind;
        let cancel = CancelToken::new();
        // The runner removes its own entry when it finishes; holding the
        // write lock across spawn+insert means that removal cannot
        // happen before the insert.
        let handle = runner::spawn(
            job,
            input,
            strategy,
            self.worker_deps.clone(),
            cancel.clone(),
            Arc::clone(&self.workers),
            persist,
        );
        workers.insert(
            job_id,
            WorkerHandle {
                job_id,
                kind,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Re-launch a recovered job (startup recovery). The strategy is
    /// rebuilt from the persisted mode and current defaults — caller
    /// overrides are ephemeral by design.
    pub async fn resume(&self, job: Job) -> Result<Uuid, DispatchError> {
        let mode = job
            .payload
            .get("mode")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| kind_mode(job.kind));
        let input: NormalizedInput = job
            .payload
            .get("input")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?
            .unwrap_or_default();

        let globals = self.globals.read().await.clone();
        let strategy = StrategyContext::build(mode, &globals, &Default::default());

        let id = job.id;
        self.launch(job, input, strategy, true).await?;
        Ok(id)
    }

    /// Scan for jobs left PENDING/RUNNING by an ungraceful exit and
    /// resume them. Returns how many were resumed.
    pub async fn recover(&self) -> usize {
        let jobs = match self.queue.pending_or_running().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Recovery scan failed");
                return 0;
            }
        };

        let mut resumed = 0;
        for job in jobs {
            let id = job.id;
            match self.resume(job).await {
                Ok(_) => resumed += 1,
                Err(e) => self
                    .bus
                    .emit_log(format!("Could not resume job {id}: {e}")),
            }
        }
        if resumed > 0 {
            info!(resumed, "Resumed interrupted jobs");
            self.bus
                .emit_log(format!("Resumed {resumed} interrupted jobs"));
        }
        resumed
    }

    /// Request cooperative cancellation of an active job.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let workers = self.workers.read().await;
        match workers.get(&job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                self.bus
                    .emit_status(format!("cancellation requested for {job_id}"));
                true
            }
            None => false,
        }
    }

    /// Abort every active worker (shutdown). Aborted jobs are recorded
    /// as CANCELLED.
    pub async fn stop_all(&self) {
        let mut workers = self.workers.write().await;
        for (job_id, handle) in workers.drain() {
            handle.cancel.cancel();
            handle.handle.abort();
            if let Err(e) = self
                .queue
                .set_status(job_id, JobStatus::Cancelled, None, None)
                .await
            {
                tracing::debug!(job_id = %job_id, error = %e, "Shutdown cancellation not persisted");
            }
        }
        self.bus.emit_status("all workers stopped");
    }

    /// Set the current mode. Unknown names fall back to chat, logged.
    pub async fn set_mode(&self, name: &str) -> Mode {
        let mode = match name.parse() {
            Ok(mode) => mode,
            Err(_) => {
                self.bus
                    .emit_log(format!("Unknown mode \"{name}\", using chat"));
                Mode::Chat
            }
        };
        *self.current_mode.write().await = mode;
        self.bus.emit_mode_changed(mode);
        self.bus.emit_log(format!("mode changed to {mode}"));
        mode
    }

    pub async fn current_mode(&self) -> Mode {
        *self.current_mode.read().await
    }

    /// Adjust the global default temperature (0.1 to 1.0).
    pub async fn set_temperature(&self, temperature: f32) {
        if (0.1..=1.0).contains(&temperature) {
            self.globals.write().await.temperature = temperature;
            self.bus
                .emit_log(format!("temperature set to {temperature}"));
        } else {
            self.bus.emit_log(format!(
                "temperature {temperature} out of range (0.1-1.0), ignored"
            ));
        }
    }

    /// Toggle the global web-search default.
    pub async fn toggle_web(&self, enabled: bool) {
        self.globals.write().await.web_enabled = enabled;
        self.bus.emit_log(format!(
            "web search {}",
            if enabled { "enabled" } else { "disabled" }
        ));
    }

    /// Switch to a workspace: ensure its folder exists and load its
    /// knowledge index (the previous workspace's map is dropped).
    pub async fn activate_workspace(&self, name: &str) -> Result<(), ConfigError> {
        self.workspace.ensure_workspace(name).await?;
        self.cache
            .activate(name, self.workspace.index_path(name))
            .await;
        self.bus.emit_log(format!("workspace \"{name}\" activated"));
        Ok(())
    }

    /// IDs and kinds of currently active workers.
    pub async fn active_jobs(&self) -> Vec<(Uuid, JobKind)> {
        self.workers
            .read()
            .await
            .values()
            .map(|h| (h.job_id, h.kind))
            .collect()
    }

    /// kb_search fast path: in-memory index search, no job, no queue.
    async fn kb_search(&self, query: &str) -> String {
        let hits = self.cache.search(query, 5).await;
        if hits.is_empty() {
            return NO_RESULTS.to_string();
        }
        let mut out = String::from("Knowledge index results:\n");
        for hit in hits {
            out.push_str(&format!(
                "- {} (score {:.2}): {}\n",
                hit.file, hit.score, hit.summary
            ));
        }
        out
    }

    /// system_cmd fast path: local command processor over the queue and
    /// cache. Never touches the network.
    async fn system_cmd(&self, command: &str) -> String {
        let command = command.trim().to_lowercase();

        if let Some(caps) = PURGE_RE.captures(&command) {
            let days = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(self.config.retention_days);
            return match self.queue.purge_older_than(days).await {
                Ok(n) => format!("Purged {n} terminal jobs older than {days} days."),
                Err(e) => format!("Purge failed: {e}"),
            };
        }

        match command.as_str() {
            "stats" | "queue stats" => match self.queue.stats().await {
                Ok(stats) => {
                    let mut by_status: Vec<_> = stats.by_status.iter().collect();
                    by_status.sort();
                    let breakdown = by_status
                        .iter()
                        .map(|(s, n)| format!("{s}: {n}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "{} jobs ({}). Durable: {}.",
                        stats.total,
                        if breakdown.is_empty() {
                            "empty".to_string()
                        } else {
                            breakdown
                        },
                        self.queue.is_durable()
                    )
                }
                Err(e) => format!("Stats unavailable: {e}"),
            },
            "cache stats" => {
                let stats = self.cache.stats().await;
                match stats.workspace {
                    Some(ws) => format!("{} cached records for workspace \"{ws}\".", stats.records),
                    None => "No workspace is active.".to_string(),
                }
            }
            "cache clear" => match self.cache.clear().await {
                Ok(n) => format!("Cleared {n} cached records."),
                Err(e) => format!("Cache clear failed: {e}"),
            },
            "mode" => format!("Current mode: {}.", self.current_mode.read().await),
            "workers" => format!("Active workers: {}.", self.workers.read().await.len()),
            _ => "Commands: stats, purge [days], cache stats, cache clear, mode, workers."
                .to_string(),
        }
    }
}

/// The persisted payload for a queued job.
fn job_payload(mode: Mode, input: &NormalizedInput) -> serde_json::Value {
    serde_json::json!({
        "mode": mode.as_str(),
        "input": input,
    })
}

/// Default mode for a recovered job whose payload lost its mode field.
fn kind_mode(kind: JobKind) -> Mode {
    match kind {
        JobKind::Chat => Mode::Chat,
        JobKind::SimpleQa => Mode::SimpleQa,
        JobKind::DeepWrite => Mode::DeepWrite,
        JobKind::Writer => Mode::Writer,
        JobKind::Analysis => Mode::Analysis,
        JobKind::AnalyzePersona => Mode::AnalyzePersona,
    }
}
