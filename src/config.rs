//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root directory for all on-disk state (workspaces, job database).
    pub workspace_root: PathBuf,
    /// Terminal jobs older than this are eligible for retention cleanup.
    pub retention_days: u32,
    /// Wall-clock budget for a whole job before it is failed.
    pub job_timeout: Duration,
    /// Budget for a single generation call.
    pub generate_timeout: Duration,
    /// Capacity of each event broadcast channel.
    pub event_capacity: usize,
    /// How many times a failed composition stage is retried.
    pub max_stage_retries: u32,
    /// Maximum documents read for a workspace profile.
    pub profile_max_files: usize,
    /// Per-document excerpt length for a workspace profile.
    pub profile_excerpt_chars: usize,
    /// Document excerpt length fed to per-file analysis.
    pub analysis_excerpt_chars: usize,
    /// Length of the summary preview stored in the cache record.
    pub preview_chars: usize,
    /// Maximum web results pulled in as generation context.
    pub web_context_results: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./scribe-workspace"),
            retention_days: 7,
            job_timeout: Duration::from_secs(1800), // 30 minutes
            generate_timeout: Duration::from_secs(1500),
            event_capacity: 256,
            max_stage_retries: 1,
            profile_max_files: 5,
            profile_excerpt_chars: 1000,
            analysis_excerpt_chars: 6000,
            preview_chars: 500,
            web_context_results: 5,
        }
    }
}

impl CoreConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Recognized: `SCRIBE_WORKSPACE`, `SCRIBE_RETENTION_DAYS`,
    /// `SCRIBE_JOB_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("SCRIBE_WORKSPACE") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(days) = std::env::var("SCRIBE_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.retention_days = days;
        }
        if let Some(secs) = std::env::var("SCRIBE_JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.job_timeout = Duration::from_secs(secs);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.max_stage_retries, 1);
        assert!(config.job_timeout >= config.generate_timeout);
    }
}
