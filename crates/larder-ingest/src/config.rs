//! Configuration for the ingestion pipeline components.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the durable buffer.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Directory holding segment files.
    pub data_dir: PathBuf,

    /// Maximum entries in the active segment before it seals itself.
    /// Default: 500
    pub max_segment_entries: usize,

    /// Maximum age of the active segment before it seals itself.
    /// Default: 5 minutes
    pub max_segment_age: Duration,

    /// Prefix for segment file names.
    /// Default: "segment"
    pub segment_prefix: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/segments"),
            max_segment_entries: 500,
            max_segment_age: Duration::from_secs(300),
            segment_prefix: "segment".to_string(),
        }
    }
}

/// Configuration for the dedup index's remote snapshot.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How old the remote snapshot may grow before a refresh is required.
    /// Default: 60 seconds
    pub staleness_window: Duration,

    /// How long past the staleness window a stale snapshot is still trusted
    /// when the remote store cannot be reached. Beyond this, dedup checks
    /// fail with `StoreUnavailable` rather than risk a false negative.
    /// Default: 5 minutes
    pub grace_period: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(60),
            grace_period: Duration::from_secs(300),
        }
    }
}

/// Configuration for the commit scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduled flush attempts.
    /// Default: 30 seconds
    pub flush_interval: Duration,

    /// Ceiling for the exponential retry backoff after failed commits.
    /// Default: 10 minutes
    pub backoff_ceiling: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            backoff_ceiling: Duration::from_secs(600),
        }
    }
}

/// Configuration for the HTTP remote store client.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the remote dataset API (e.g., "https://datasets.example.com").
    pub base_url: String,

    /// Dataset identifier (e.g., "sharktide/recipes").
    pub dataset: String,

    /// Bearer token for the remote API, if required.
    pub token: Option<String>,

    /// Timeout applied to every remote request.
    /// Default: 10 seconds
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8900".to_string(),
            dataset: "recipes".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Combined configuration for an [`crate::IngestPipeline`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Durable buffer settings.
    pub buffer: BufferConfig,
    /// Dedup snapshot settings.
    pub dedup: DedupConfig,
    /// Commit scheduler settings.
    pub scheduler: SchedulerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_defaults() {
        let config = BufferConfig::default();
        assert_eq!(config.max_segment_entries, 500);
        assert_eq!(config.max_segment_age, Duration::from_secs(300));
        assert_eq!(config.segment_prefix, "segment");
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.backoff_ceiling > config.flush_interval);
    }

    #[test]
    fn test_dedup_defaults() {
        let config = DedupConfig::default();
        assert!(config.grace_period > config.staleness_window);
    }
}
