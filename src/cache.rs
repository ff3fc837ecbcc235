//! Knowledge cache — per-workspace, content-addressed analysis cache.
//!
//! Records are keyed by file basename and validated by the file's
//! modification-time fingerprint, so a changed file misses and gets
//! re-analyzed while an untouched one is served from the index. The
//! on-disk index is a hidden JSON file inside the workspace's document
//! folder, written with a temp-then-rename discipline so a kill mid-write
//! can never leave it half-written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::CacheError;

/// Fingerprint comparison tolerance in seconds.
const FINGERPRINT_TOLERANCE: f64 = 0.1;

/// Result of a prior per-file analysis, as stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    /// File mtime (seconds since epoch) at analysis time.
    pub fingerprint: f64,
    pub summary: String,
    pub keywords: Vec<String>,
    pub preview: String,
    pub computed_at: DateTime<Utc>,
    /// Full path at analysis time, kept for traceability.
    pub source_path: String,
}

/// What a completed analysis contributes to the cache.
#[derive(Debug, Clone)]
pub struct AnalysisArtifact {
    pub summary: String,
    pub keywords: Vec<String>,
    pub preview: String,
}

/// A hit from the in-memory knowledge search.
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub file: String,
    pub score: f32,
    pub summary: String,
}

/// Cache statistics for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub workspace: Option<String>,
    pub records: usize,
    pub index_path: Option<PathBuf>,
}

struct ActiveIndex {
    workspace: String,
    index_path: PathBuf,
    records: HashMap<String, CacheRecord>,
}

/// Per-workspace analysis cache. At most one workspace is active at a
/// time; switching workspaces drops the previous map from memory and
/// leaves its file untouched on disk.
pub struct KnowledgeCache {
    state: RwLock<Option<ActiveIndex>>,
}

impl KnowledgeCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Load `workspace`'s index from `index_path` into memory.
    ///
    /// A missing index starts empty; a corrupt one is renamed aside with
    /// a backup suffix and replaced by an empty map. Never fails the
    /// activation.
    pub async fn activate(&self, workspace: &str, index_path: PathBuf) {
        let records = match tokio::fs::read_to_string(&index_path).await {
            Ok(text) => match serde_json::from_str::<HashMap<String, CacheRecord>>(&text) {
                Ok(records) => {
                    info!(
                        workspace,
                        records = records.len(),
                        "Knowledge index loaded"
                    );
                    records
                }
                Err(e) => {
                    let backup = index_path.with_extension(format!(
                        "json.backup.{}",
                        Utc::now().timestamp()
                    ));
                    warn!(
                        workspace,
                        error = %e,
                        backup = %backup.display(),
                        "Knowledge index corrupt, rebuilding from empty"
                    );
                    if let Err(e) = tokio::fs::rename(&index_path, &backup).await {
                        warn!(error = %e, "Failed to back up corrupt index");
                    }
                    HashMap::new()
                }
            },
            Err(_) => {
                info!(workspace, "No knowledge index yet, starting empty");
                HashMap::new()
            }
        };

        let mut state = self.state.write().await;
        *state = Some(ActiveIndex {
            workspace: workspace.to_string(),
            index_path,
            records,
        });
    }

    /// Drop the active workspace's map from memory (its file stays on
    /// disk).
    pub async fn deactivate(&self) {
        *self.state.write().await = None;
    }

    /// Look up a valid cached record for `path`.
    ///
    /// Returns `Some` only when the file exists and its current mtime
    /// matches the stored fingerprint.
    pub async fn lookup(&self, path: &Path) -> Option<CacheRecord> {
        let current = mtime_fingerprint(path).ok()?;
        let name = basename(path)?;

        let state = self.state.read().await;
        let index = state.as_ref()?;
        let record = index.records.get(&name)?;
        if (record.fingerprint - current).abs() < FINGERPRINT_TOLERANCE {
            debug!(file = %name, "Cache hit");
            Some(record.clone())
        } else {
            debug!(file = %name, "Cache stale (fingerprint mismatch)");
            None
        }
    }

    /// Store or overwrite the record for `path` and persist the index.
    pub async fn update(&self, path: &Path, artifact: AnalysisArtifact) -> Result<(), CacheError> {
        let fingerprint = mtime_fingerprint(path)?;
        let name =
            basename(path).ok_or_else(|| CacheError::FileNotFound(path.display().to_string()))?;

        let record = CacheRecord {
            fingerprint,
            summary: artifact.summary,
            keywords: artifact.keywords,
            preview: artifact.preview,
            computed_at: Utc::now(),
            source_path: path.display().to_string(),
        };

        let mut state = self.state.write().await;
        let index = state.as_mut().ok_or(CacheError::NoActiveWorkspace)?;
        index.records.insert(name.clone(), record);
        persist(index).await?;
        debug!(file = %name, "Cache record updated");
        Ok(())
    }

    /// Remove the record for `path`, if any.
    pub async fn remove(&self, path: &Path) -> Result<bool, CacheError> {
        let Some(name) = basename(path) else {
            return Ok(false);
        };
        let mut state = self.state.write().await;
        let index = state.as_mut().ok_or(CacheError::NoActiveWorkspace)?;
        let removed = index.records.remove(&name).is_some();
        if removed {
            persist(index).await?;
        }
        Ok(removed)
    }

    /// Drop every record of the active workspace and persist the empty
    /// index.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut state = self.state.write().await;
        let index = state.as_mut().ok_or(CacheError::NoActiveWorkspace)?;
        let count = index.records.len();
        index.records.clear();
        persist(index).await?;
        info!(cleared = count, workspace = %index.workspace, "Knowledge cache cleared");
        Ok(count)
    }

    /// Case-insensitive term search over the in-memory records
    /// (keywords, summary, preview), scored by matched-term fraction.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<KnowledgeHit> {
        let query = query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let state = self.state.read().await;
        let Some(index) = state.as_ref() else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        for (file, record) in &index.records {
            let haystack = format!(
                "{} {} {}",
                record.keywords.join(" "),
                record.summary,
                record.preview
            )
            .to_lowercase();
            let matched = terms.iter().filter(|t| haystack.contains(**t)).count();
            if matched > 0 {
                hits.push(KnowledgeHit {
                    file: file.clone(),
                    score: matched as f32 / terms.len() as f32,
                    summary: record.summary.chars().take(200).collect(),
                });
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        match state.as_ref() {
            Some(index) => CacheStats {
                workspace: Some(index.workspace.clone()),
                records: index.records.len(),
                index_path: Some(index.index_path.clone()),
            },
            None => CacheStats {
                workspace: None,
                records: 0,
                index_path: None,
            },
        }
    }
}

impl Default for KnowledgeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the index to a temp file, then rename it over the real one.
async fn persist(index: &ActiveIndex) -> Result<(), CacheError> {
    if let Some(parent) = index.index_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let text = serde_json::to_string_pretty(&index.records)?;
    let tmp = index.index_path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, &index.index_path).await?;
    Ok(())
}

/// File mtime as seconds since the epoch — the cheap change fingerprint.
fn mtime_fingerprint(path: &Path) -> Result<f64, CacheError> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| CacheError::FileNotFound(path.display().to_string()))?;
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
