//! Worker pool — per-job background execution.
//!
//! Each job kind maps to a worker implementing [`JobWorker`]. Workers
//! emit progress on the status channel and produce a [`JobOutput`]; the
//! runner owns the boundary that turns success, failure, cancellation,
//! panic or timeout into exactly one terminal status and one terminal
//! event.

pub mod analysis;
pub mod cancel;
pub mod chat;
pub mod compose;
pub mod runner;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

pub use cancel::CancelToken;

use crate::cache::KnowledgeCache;
use crate::clients::{GenerateOptions, GenerationService, ParserRegistry, WebSearch};
use crate::config::CoreConfig;
use crate::dispatch::{Mode, NormalizedInput, StrategyContext};
use crate::error::{GenerationError, WorkerError};
use crate::events::EventBus;
use crate::modules::ModuleSlot;
use crate::queue::{JobKind, JobStore};
use crate::workspace::WorkspaceManager;

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub config: CoreConfig,
    pub generation: Arc<dyn GenerationService>,
    pub parsers: Arc<ParserRegistry>,
    pub web: ModuleSlot<dyn WebSearch>,
    pub cache: Arc<KnowledgeCache>,
    pub workspace: Arc<WorkspaceManager>,
    pub queue: Arc<dyn JobStore>,
    pub bus: EventBus,
}

/// Everything a worker needs to execute one job.
pub struct JobContext {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub mode: Mode,
    pub input: NormalizedInput,
    pub strategy: StrategyContext,
    pub cancel: CancelToken,
}

impl JobContext {
    /// Cancellation checkpoint — called between stages, never inside an
    /// external call.
    pub fn checkpoint(&self) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            Err(WorkerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a successful worker run.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub content: String,
    pub data: Option<serde_json::Value>,
}

impl JobOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }
}

/// A worker executing one kind of job.
#[async_trait]
pub trait JobWorker: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, WorkerError>;
}

/// Pick the worker for a job kind.
pub(crate) fn select_worker(kind: JobKind, deps: WorkerDeps) -> Box<dyn JobWorker> {
    match kind {
        JobKind::Chat | JobKind::SimpleQa => Box::new(chat::ChatWorker::new(deps)),
        JobKind::DeepWrite | JobKind::Writer => Box::new(compose::ComposeWorker::new(deps)),
        JobKind::Analysis => Box::new(analysis::AnalysisWorker::new(deps)),
        JobKind::AnalyzePersona => Box::new(analysis::PersonaWorker::new(deps)),
    }
}

/// One generation call under the configured timeout.
pub(crate) async fn generate_bounded(
    deps: &WorkerDeps,
    prompt: &str,
    strategy: &StrategyContext,
) -> Result<String, WorkerError> {
    let options = GenerateOptions {
        temperature: strategy.temperature,
        system_prompt: strategy.system_prompt.clone(),
        max_tokens: None,
    };

    let text = tokio::time::timeout(
        deps.config.generate_timeout,
        deps.generation.generate(prompt, &options),
    )
    .await
    .map_err(|_| GenerationError::Timeout(deps.config.generate_timeout))??;

    Ok(text)
}

/// Pull web results in as generation context, if the strategy wants the
/// web and the search module is available. Search failures are logged
/// and skipped; they never fail the job.
pub(crate) async fn web_context(deps: &WorkerDeps, query: &str) -> Option<String> {
    let Some(web) = deps.web.get() else {
        return None;
    };

    match web.search(query, deps.config.web_context_results).await {
        Ok(hits) if !hits.is_empty() => {
            let lines: Vec<String> = hits
                .iter()
                .map(|h| format!("- {} — {} ({})", h.title, h.snippet, h.url))
                .collect();
            Some(format!("Web findings:\n{}", lines.join("\n")))
        }
        Ok(_) => None,
        Err(e) => {
            deps.bus
                .emit_log(format!("Web search failed, continuing without it: {e}"));
            None
        }
    }
}
