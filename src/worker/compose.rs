//! Compose worker — staged long-form writing (writer, deep_write).
//!
//! The piece is produced in discrete stages: outline, introduction,
//! body, conclusion. Each stage is one generation call; a failed stage
//! is retried once before the whole job fails with the stage recorded.
//! Stage boundaries double as cancellation checkpoints.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::dispatch::StrategyContext;
use crate::error::WorkerError;
use crate::worker::{JobContext, JobOutput, JobWorker, WorkerDeps, generate_bounded, web_context};

/// How much of a finished section feeds the next stage's prompt, so
/// consecutive sections join up.
const TAIL_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Outline,
    Introduction,
    Body,
    Conclusion,
}

impl Stage {
    const SECTIONS: [Stage; 3] = [Stage::Introduction, Stage::Body, Stage::Conclusion];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Outline => "outline",
            Self::Introduction => "introduction",
            Self::Body => "body",
            Self::Conclusion => "conclusion",
        };
        write!(f, "{s}")
    }
}

pub struct ComposeWorker {
    deps: WorkerDeps,
}

impl ComposeWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }

    /// Read reference documents into a bounded context block. Unreadable
    /// files are logged and skipped, never fatal.
    async fn document_context(&self, files: &[PathBuf]) -> String {
        let excerpt_chars = self.deps.config.profile_excerpt_chars;
        let reads = files.iter().map(|path| {
            let parsers = self.deps.parsers.clone();
            async move { (path.clone(), parsers.parse(path).await) }
        });

        let mut context = String::new();
        for (path, result) in join_all(reads).await {
            match result {
                Ok(text) => {
                    let excerpt: String = text.chars().take(excerpt_chars).collect();
                    context.push_str(&format!(
                        "--- document: {} ---\n{}\n",
                        path.display(),
                        excerpt
                    ));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable reference document");
                }
            }
        }
        context
    }

    /// One stage, retried at most `max_stage_retries` times.
    async fn run_stage(
        &self,
        ctx: &JobContext,
        stage: Stage,
        prompt: &str,
    ) -> Result<String, WorkerError> {
        let max_retries = self.deps.config.max_stage_retries;
        let mut attempt = 0;
        loop {
            ctx.checkpoint()?;
            self.deps
                .bus
                .emit_status(format!("{}: writing {stage}", ctx.kind));

            match generate_bounded(&self.deps, prompt, &ctx.strategy).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) if attempt < max_retries => {
                    self.note_retry(ctx, stage, "empty response").await;
                }
                Ok(_) => {
                    return Err(WorkerError::StageFailed {
                        stage: stage.to_string(),
                        attempts: attempt + 1,
                        reason: "empty response".to_string(),
                    });
                }
                Err(WorkerError::Cancelled) => return Err(WorkerError::Cancelled),
                Err(e) if attempt < max_retries => {
                    self.note_retry(ctx, stage, &e.to_string()).await;
                }
                Err(e) => {
                    return Err(WorkerError::StageFailed {
                        stage: stage.to_string(),
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    });
                }
            }
            attempt += 1;
        }
    }

    async fn note_retry(&self, ctx: &JobContext, stage: Stage, reason: &str) {
        self.deps
            .bus
            .emit_status(format!("{}: {stage} failed, retrying ({reason})", ctx.kind));
        if let Err(e) = self.deps.queue.record_retry(ctx.job_id).await {
            warn!(job_id = %ctx.job_id, error = %e, "Failed to record stage retry");
        }
    }
}

fn stage_prompt(
    stage: Stage,
    topic: &str,
    strategy: &StrategyContext,
    research: &str,
    documents: &str,
    outline: &str,
    tail: &str,
) -> String {
    let mut prompt = format!(
        "You are writing a {} piece for {}. Tone: {}. Goal: {}.\n",
        strategy.genre, strategy.audience, strategy.tone, strategy.goal
    );
    if !research.is_empty() {
        prompt.push_str(research);
        prompt.push('\n');
    }
    if !documents.is_empty() {
        prompt.push_str(documents);
        prompt.push('\n');
    }

    match stage {
        Stage::Outline => {
            prompt.push_str(&format!(
                "Produce a numbered outline (4-8 points) for a piece on:\n{topic}\n"
            ));
        }
        Stage::Introduction => {
            prompt.push_str(&format!(
                "Outline:\n{outline}\nWrite the introduction for a piece on:\n{topic}\n"
            ));
        }
        Stage::Body => {
            prompt.push_str(&format!(
                "Outline:\n{outline}\nThe piece so far ends with:\n...{tail}\n\
                 Continue seamlessly with the main body. Do not repeat the last sentence.\n"
            ));
        }
        Stage::Conclusion => {
            prompt.push_str(&format!(
                "Outline:\n{outline}\nThe piece so far ends with:\n...{tail}\n\
                 Write the conclusion.\n"
            ));
        }
    }
    prompt
}

#[async_trait]
impl JobWorker for ComposeWorker {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, WorkerError> {
        ctx.checkpoint()?;
        let topic = ctx.input.text.clone();

        let documents = if ctx.input.files.is_empty() {
            String::new()
        } else {
            self.deps
                .bus
                .emit_status(format!("{}: reading {} documents", ctx.kind, ctx.input.files.len()));
            self.document_context(&ctx.input.files).await
        };
        ctx.checkpoint()?;

        let research = if ctx.strategy.web_enabled {
            self.deps
                .bus
                .emit_status(format!("{}: researching", ctx.kind));
            web_context(&self.deps, &topic).await.unwrap_or_default()
        } else {
            String::new()
        };

        let outline = self
            .run_stage(
                ctx,
                Stage::Outline,
                &stage_prompt(Stage::Outline, &topic, &ctx.strategy, &research, &documents, "", ""),
            )
            .await?;

        let mut sections: Vec<String> = Vec::with_capacity(Stage::SECTIONS.len());
        for stage in Stage::SECTIONS {
            let tail: String = sections
                .last()
                .map(|s: &String| {
                    let chars: Vec<char> = s.chars().collect();
                    let start = chars.len().saturating_sub(TAIL_CHARS);
                    chars[start..].iter().collect()
                })
                .unwrap_or_default();

            let prompt = stage_prompt(
                stage,
                &topic,
                &ctx.strategy,
                &research,
                &documents,
                &outline,
                &tail,
            );
            let section = self.run_stage(ctx, stage, &prompt).await?;
            sections.push(section);
        }

        Ok(JobOutput {
            content: sections.join("\n\n"),
            data: Some(serde_json::json!({
                "outline": outline,
                "stages": Stage::SECTIONS.map(|s| s.to_string()),
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::KnowledgeCache;
    use crate::clients::{GenerateOptions, GenerationService, ParserRegistry};
    use crate::config::CoreConfig;
    use crate::dispatch::{ConfigOverrides, GlobalStrategy, Mode, NormalizedInput};
    use crate::error::GenerationError;
    use crate::events::EventBus;
    use crate::modules::ModuleSlot;
    use crate::queue::{JobKind, JobStore, MemoryJobStore};
    use crate::worker::CancelToken;
    use crate::workspace::WorkspaceManager;

    /// Fails the first `fail_first` calls, succeeds afterwards.
    struct FlakyGeneration {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl GenerationService for FlakyGeneration {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<String, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(GenerationError::Failed("transient".into()))
            } else {
                Ok(format!("section for: {}", prompt.len()))
            }
        }
    }

    fn deps(generation: Arc<dyn GenerationService>, queue: Arc<dyn JobStore>) -> WorkerDeps {
        WorkerDeps {
            config: CoreConfig::default(),
            generation,
            parsers: Arc::new(ParserRegistry::with_builtins()),
            web: ModuleSlot::Unavailable("not configured".into()),
            cache: Arc::new(KnowledgeCache::new()),
            workspace: Arc::new(WorkspaceManager::new("/tmp/unused")),
            queue,
            bus: EventBus::new(32),
        }
    }

    async fn ctx(queue: &Arc<dyn JobStore>) -> JobContext {
        let job = queue
            .enqueue(JobKind::DeepWrite, serde_json::json!({}))
            .await
            .unwrap();
        JobContext {
            job_id: job.id,
            kind: JobKind::DeepWrite,
            mode: Mode::DeepWrite,
            input: NormalizedInput {
                text: "the history of movable type".to_string(),
                ..Default::default()
            },
            strategy: StrategyContext::build(
                Mode::DeepWrite,
                &GlobalStrategy::default(),
                &ConfigOverrides {
                    web_enabled: Some(false),
                    ..Default::default()
                },
            ),
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn produces_all_sections() {
        let queue: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let generation = Arc::new(FlakyGeneration {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let worker = ComposeWorker::new(deps(generation, queue.clone()));

        let output = worker.run(&ctx(&queue).await).await.unwrap();
        // Introduction, body, conclusion.
        assert_eq!(output.content.split("\n\n").count(), 3);
        let data = output.data.unwrap();
        assert!(data["outline"].as_str().unwrap().contains("section for"));
    }

    #[tokio::test]
    async fn transient_stage_failure_is_retried_once() {
        let queue: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let generation = Arc::new(FlakyGeneration {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });
        let worker = ComposeWorker::new(deps(generation, queue.clone()));
        let ctx = ctx(&queue).await;

        let output = worker.run(&ctx).await.unwrap();
        assert!(!output.content.is_empty());

        // The retry is visible on the job record.
        let job = queue.get(ctx.job_id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn persistent_failure_records_the_stage() {
        let queue: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let generation = Arc::new(FlakyGeneration {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let worker = ComposeWorker::new(deps(generation, queue.clone()));

        let err = worker.run(&ctx(&queue).await).await.unwrap_err();
        match err {
            WorkerError::StageFailed {
                stage, attempts, ..
            } => {
                assert_eq!(stage, "outline");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected StageFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_stages() {
        let queue: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let generation = Arc::new(FlakyGeneration {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let worker = ComposeWorker::new(deps(generation, queue.clone()));
        let ctx = ctx(&queue).await;
        ctx.cancel.cancel();

        let err = worker.run(&ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }
}
