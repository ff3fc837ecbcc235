//! Analysis workers — per-file document analysis and workspace profiles.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::cache::AnalysisArtifact;
use crate::error::WorkerError;
use crate::worker::{JobContext, JobOutput, JobWorker, WorkerDeps, generate_bounded};

/// How many keywords a file analysis extracts.
const KEYWORD_COUNT: usize = 8;

/// Per-file document analysis.
///
/// The cache is consulted first: a fingerprint hit short-circuits the
/// expensive generation call entirely. A fresh analysis parses the file,
/// summarizes it through the generation service, extracts keywords
/// locally, and writes the record back to the cache.
pub struct AnalysisWorker {
    deps: WorkerDeps,
}

impl AnalysisWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobWorker for AnalysisWorker {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, WorkerError> {
        ctx.checkpoint()?;
        let path = ctx
            .input
            .file
            .as_deref()
            .ok_or_else(|| WorkerError::MissingInput("analysis requires a file path".into()))?;

        if let Some(record) = self.deps.cache.lookup(path).await {
            self.deps
                .bus
                .emit_status(format!("{}: cache hit for {}", ctx.kind, path.display()));
            return Ok(JobOutput {
                content: record.summary,
                data: Some(serde_json::json!({
                    "keywords": record.keywords,
                    "preview": record.preview,
                    "cached": true,
                })),
            });
        }

        self.deps
            .bus
            .emit_status(format!("{}: parsing {}", ctx.kind, path.display()));
        let text = self.deps.parsers.parse(path).await?;
        let excerpt: String = text
            .chars()
            .take(self.deps.config.analysis_excerpt_chars)
            .collect();

        ctx.checkpoint()?;
        self.deps
            .bus
            .emit_status(format!("{}: summarizing {}", ctx.kind, path.display()));
        let prompt = format!(
            "Summarize the following document for {}. Capture its core \
             argument, structure and notable traits in one paragraph.\n\n{excerpt}",
            ctx.strategy.audience
        );
        let summary = generate_bounded(&self.deps, &prompt, &ctx.strategy).await?;

        let keywords = extract_keywords(&text, KEYWORD_COUNT);
        let preview: String = summary.chars().take(self.deps.config.preview_chars).collect();

        let artifact = AnalysisArtifact {
            summary: summary.clone(),
            keywords: keywords.clone(),
            preview,
        };
        // A missing active workspace degrades to an uncached result; the
        // analysis itself still succeeds.
        if let Err(e) = self.deps.cache.update(path, artifact).await {
            warn!(path = %path.display(), error = %e, "Could not cache analysis result");
        }

        Ok(JobOutput {
            content: summary,
            data: Some(serde_json::json!({
                "keywords": keywords,
                "cached": false,
            })),
        })
    }
}

/// Workspace-wide style/content profile.
///
/// Samples a bounded number of documents, excerpts each, and synthesizes
/// a profile in one generation call. An empty workspace is a friendly
/// result, not an error.
pub struct PersonaWorker {
    deps: WorkerDeps,
}

impl PersonaWorker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobWorker for PersonaWorker {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutput, WorkerError> {
        ctx.checkpoint()?;
        let workspace = ctx
            .input
            .workspace
            .clone()
            .or_else(|| {
                let t = ctx.input.text.trim();
                (!t.is_empty()).then(|| t.to_string())
            })
            .unwrap_or_else(|| "default".to_string());

        let documents = self
            .deps
            .workspace
            .list_documents(&workspace)
            .await
            .map_err(|e| WorkerError::MissingInput(format!("cannot list workspace: {e}")))?;

        let parseable: Vec<_> = documents
            .iter()
            .filter(|d| self.deps.parsers.can_handle(&d.path))
            .take(self.deps.config.profile_max_files)
            .collect();

        if parseable.is_empty() {
            return Ok(JobOutput::text(format!(
                "The workspace \"{workspace}\" has no readable documents yet. \
                 Import documents and I will build a profile from them."
            )));
        }

        self.deps.bus.emit_status(format!(
            "{}: sampling {} documents from {workspace}",
            ctx.kind,
            parseable.len()
        ));

        let excerpt_chars = self.deps.config.profile_excerpt_chars;
        let reads = parseable.iter().map(|doc| {
            let parsers = self.deps.parsers.clone();
            let path = doc.path.clone();
            let name = doc.name.clone();
            async move { (name, parsers.parse(&path).await) }
        });

        let mut combined = String::new();
        let mut sampled = 0usize;
        for (name, result) in join_all(reads).await {
            match result {
                Ok(text) => {
                    let excerpt: String = text.chars().take(excerpt_chars).collect();
                    combined.push_str(&format!("--- document: {name} ---\n{excerpt}\n"));
                    sampled += 1;
                }
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable document"),
            }
        }

        if combined.is_empty() {
            return Ok(JobOutput::text(format!(
                "No document in workspace \"{workspace}\" could be read."
            )));
        }

        ctx.checkpoint()?;
        let prompt = format!(
            "Based on the following document excerpts, build a profile of the \
             workspace \"{workspace}\":\n\
             1. Five core keywords (comma separated).\n\
             2. A short style description (under 100 words).\n\
             3. Its core themes or values.\n\n{combined}"
        );
        let profile = generate_bounded(&self.deps, &prompt, &ctx.strategy).await?;

        Ok(JobOutput {
            content: profile,
            data: Some(serde_json::json!({
                "workspace": workspace,
                "files_sampled": sampled,
            })),
        })
    }
}

/// Frequency-ranked keyword extraction, local and cheap.
fn extract_keywords(text: &str, count: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "about", "after", "also", "been", "before", "being", "between", "could",
        "does", "each", "from", "have", "here", "into", "itself", "more", "most", "only", "other",
        "over", "same", "should", "some", "such", "than", "that", "their", "them", "then", "there",
        "these", "they", "this", "those", "under", "very", "were", "what", "when", "where",
        "which", "while", "will", "with", "would", "your",
    ];

    let mut frequency: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.chars().count() < 4 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        *frequency.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(w, _)| w).collect()
}
