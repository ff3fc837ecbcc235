//! Collaborator seams — the black-box services the core consumes.
//!
//! The generation service, document parsers and web search live outside
//! this crate; they are consumed through the traits here and injected as
//! `Arc<dyn ...>`. Only a plain-text parser and a deterministic offline
//! generation backend ship in-crate.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GenerationError, ParseError, SearchError};

/// Per-call options for the generation service.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Text generation service (LLM client).
///
/// Calls may run for tens of minutes; callers own the timeout. Failures
/// are an explicit `Err`, never an error-shaped success string.
#[async_trait]
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError>;
}

/// A document format parser.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Whether this parser understands the file at `path`.
    fn can_handle(&self, path: &Path) -> bool;

    /// Extract plain text from the file.
    async fn parse(&self, path: &Path) -> Result<String, ParseError>;
}

/// One hit from a web search.
#[derive(Debug, Clone)]
pub struct WebHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Web search backend.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, SearchError>;
}

/// Ordered parser registry; the first parser that can handle a path wins.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in plain-text parser registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
        self.parsers.push(parser);
    }

    pub fn can_handle(&self, path: &Path) -> bool {
        self.parsers.iter().any(|p| p.can_handle(path))
    }

    /// Parse `path` with the first capable parser.
    pub async fn parse(&self, path: &Path) -> Result<String, ParseError> {
        for parser in &self.parsers {
            if parser.can_handle(path) {
                return parser.parse(path).await;
            }
        }
        Err(ParseError::Unsupported(path.display().to_string()))
    }
}

/// Built-in parser for plain-text formats (txt, md).
pub struct PlainTextParser;

#[async_trait]
impl DocumentParser for PlainTextParser {
    fn can_handle(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt" | "md" | "markdown")
        )
    }

    async fn parse(&self, path: &Path) -> Result<String, ParseError> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Deterministic generation backend with no external dependencies.
///
/// Used by the companion binary (so the orchestration loop can be driven
/// end-to-end offline) and by tests. Echoes a bounded digest of the
/// prompt instead of calling a model.
pub struct OfflineGeneration;

#[async_trait]
impl GenerationService for OfflineGeneration {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError> {
        let head: String = prompt.chars().take(160).collect();
        let head = head.replace(['\n', '\r'], " ");
        Ok(format!(
            "[offline generation, temperature {:.1}] {}",
            options.temperature,
            head.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn registry_picks_first_capable_parser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# heading").unwrap();

        let registry = ParserRegistry::with_builtins();
        assert!(registry.can_handle(&path));
        let text = registry.parse(&path).await.unwrap();
        assert!(text.contains("heading"));
    }

    #[tokio::test]
    async fn registry_rejects_unknown_format() {
        let registry = ParserRegistry::with_builtins();
        let err = registry.parse(Path::new("diagram.xyz")).await.unwrap_err();
        assert!(matches!(err, ParseError::Unsupported(_)));
    }

    #[tokio::test]
    async fn offline_generation_is_deterministic() {
        let backend = OfflineGeneration;
        let options = GenerateOptions {
            temperature: 0.7,
            ..Default::default()
        };
        let a = backend.generate("write about rust", &options).await.unwrap();
        let b = backend.generate("write about rust", &options).await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("write about rust"));
    }
}
