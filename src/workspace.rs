//! On-disk layout manager.
//!
//! Everything the core persists lives under one root:
//! - `spaces/<workspace>/` — a workspace's documents, plus its hidden
//!   knowledge index (`.knowledge_index.json`)
//! - `data/jobs.db` — the durable job queue

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::ConfigError;

/// Name of the hidden per-workspace knowledge index file.
pub const KNOWLEDGE_INDEX_FILE: &str = ".knowledge_index.json";

/// An entry in a workspace document listing.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Owns the on-disk layout rooted at a single directory.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a workspace's documents.
    pub fn document_dir(&self, workspace: &str) -> PathBuf {
        self.root.join("spaces").join(workspace)
    }

    /// Path of a workspace's knowledge index file.
    pub fn index_path(&self, workspace: &str) -> PathBuf {
        self.document_dir(workspace).join(KNOWLEDGE_INDEX_FILE)
    }

    /// Directory holding process-level state (the job database).
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Path of the durable job queue database.
    pub fn jobs_db_path(&self) -> PathBuf {
        self.data_dir().join("jobs.db")
    }

    /// Create the base directory structure.
    pub async fn ensure_dirs(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(self.data_dir()).await?;
        fs::create_dir_all(self.root.join("spaces")).await?;
        Ok(())
    }

    /// Create a workspace's document folder if missing.
    pub async fn ensure_workspace(&self, workspace: &str) -> Result<PathBuf, ConfigError> {
        let dir = self.document_dir(workspace);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// List a workspace's documents, skipping hidden files and
    /// subdirectories. Missing workspace folders yield an empty list.
    pub async fn list_documents(&self, workspace: &str) -> Result<Vec<DocumentEntry>, ConfigError> {
        let dir = self.document_dir(workspace);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            entries.push(DocumentEntry {
                path: entry.path(),
                name,
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
