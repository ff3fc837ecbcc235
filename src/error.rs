//! Error types for the orchestration core.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job queue / persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to open job store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} cannot transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Knowledge cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("No workspace is active")]
    NoActiveWorkspace,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Dispatch-time contract violations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("A worker for job {0} is already active")]
    DuplicateJob(Uuid),

    #[error("Mode {mode} requires a file reference in the payload")]
    MissingFile { mode: String },

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Errors raised inside a worker. These never escape the worker boundary;
/// the runner converts them into a FAILED status and an error event.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job was cancelled")]
    Cancelled,

    #[error("Missing worker input: {0}")]
    MissingInput(String),

    #[error("Stage {stage} failed after {attempts} attempts: {reason}")]
    StageFailed {
        stage: String,
        attempts: u32,
        reason: String,
    },

    #[error("Job timed out")]
    Timeout,

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Generation service errors (collaborator boundary).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Failed(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Document parser errors (collaborator boundary).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("No parser can handle {0}")]
    Unsupported(String),

    #[error("Failed to parse {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Web search errors (collaborator boundary).
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Web search failed: {0}")]
    Failed(String),
}

/// Subsystem module construction errors.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Module construction failed: {0}")]
    Init(String),
}

/// Result type alias for the core.
pub type Result<T> = std::result::Result<T, Error>;
