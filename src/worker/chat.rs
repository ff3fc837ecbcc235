//! Chat worker — single-call conversational jobs (chat, simple_qa).

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::worker::{JobContext, JobOutput, JobWorker, WorkerDeps, generate_bounded, web_context};

/// Placeholder delivered when the generation service returns an empty
/// body; the UI should never render a blank bubble.
const EMPTY_RESPONSE: &str = "The generation service returned no content. Please retry.";

pub struct ChatWorker {
    deps: WorkerDeps,
}

impl ChatWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobWorker for ChatWorker {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, WorkerError> {
        ctx.checkpoint()?;

        let mut prompt = String::new();
        if ctx.strategy.web_enabled {
            self.deps
                .bus
                .emit_status(format!("{}: searching the web", ctx.kind));
            if let Some(context) = web_context(&self.deps, &ctx.input.text).await {
                prompt.push_str(&context);
                prompt.push_str("\n\n");
            }
            ctx.checkpoint()?;
        }
        prompt.push_str(&ctx.input.text);

        self.deps
            .bus
            .emit_status(format!("{}: generating", ctx.kind));
        let response = generate_bounded(&self.deps, &prompt, &ctx.strategy).await?;

        let content = if response.trim().is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            response
        };
        Ok(JobOutput::text(content))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::KnowledgeCache;
    use crate::clients::{GenerateOptions, GenerationService, ParserRegistry};
    use crate::config::CoreConfig;
    use crate::dispatch::{
        ConfigOverrides, GlobalStrategy, Mode, NormalizedInput, StrategyContext,
    };
    use crate::error::GenerationError;
    use crate::events::EventBus;
    use crate::modules::ModuleSlot;
    use crate::queue::{JobKind, MemoryJobStore};
    use crate::worker::CancelToken;
    use crate::workspace::WorkspaceManager;

    struct CannedGeneration(&'static str);

    #[async_trait]
    impl GenerationService for CannedGeneration {
        fn name(&self) -> &str {
            "canned"
        }
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    fn deps(generation: Arc<dyn GenerationService>) -> WorkerDeps {
        WorkerDeps {
            config: CoreConfig::default(),
            generation,
            parsers: Arc::new(ParserRegistry::with_builtins()),
            web: ModuleSlot::Unavailable("not configured".into()),
            cache: Arc::new(KnowledgeCache::new()),
            workspace: Arc::new(WorkspaceManager::new("/tmp/unused")),
            queue: Arc::new(MemoryJobStore::new()),
            bus: EventBus::new(8),
        }
    }

    fn ctx(text: &str) -> JobContext {
        JobContext {
            job_id: uuid::Uuid::new_v4(),
            kind: JobKind::Chat,
            mode: Mode::Chat,
            input: NormalizedInput {
                text: text.to_string(),
                ..Default::default()
            },
            strategy: StrategyContext::build(
                Mode::Chat,
                &GlobalStrategy::default(),
                &ConfigOverrides::default(),
            ),
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn returns_generated_text() {
        let worker = ChatWorker::new(deps(Arc::new(CannedGeneration("an answer"))));
        let output = worker.run(&ctx("a question")).await.unwrap();
        assert_eq!(output.content, "an answer");
    }

    #[tokio::test]
    async fn empty_generation_gets_placeholder() {
        let worker = ChatWorker::new(deps(Arc::new(CannedGeneration("   "))));
        let output = worker.run(&ctx("a question")).await.unwrap();
        assert_eq!(output.content, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let worker = ChatWorker::new(deps(Arc::new(CannedGeneration("x"))));
        let ctx = ctx("a question");
        ctx.cancel.cancel();
        let err = worker.run(&ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }
}
