//! Application state and configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use larder_ingest::{
    BufferConfig, DedupConfig, HttpRemoteStore, IngestPipeline, PipelineConfig, RemoteConfig,
    RemoteStore, SchedulerConfig,
};

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080").
    pub bind_addr: String,

    /// Directory for the durable buffer's segment files.
    pub data_dir: PathBuf,

    /// Base URL of the remote dataset API.
    pub remote_url: String,

    /// Remote dataset identifier (e.g., "sharktide/recipes").
    pub remote_dataset: String,

    /// Bearer token for the remote dataset API (optional).
    pub remote_token: Option<String>,

    /// Valid API tokens (loaded from LARDER_API_TOKENS).
    pub api_tokens: HashSet<String>,

    /// Metrics exporter port (0 disables the exporter).
    pub metrics_port: u16,

    /// Interval between scheduled flushes.
    pub flush_interval: Duration,

    /// Active segment seals after this many entries.
    pub segment_max_entries: usize,

    /// Active segment seals after this age.
    pub segment_max_age: Duration,

    /// Remote snapshot staleness window for dedup checks.
    pub snapshot_staleness: Duration,

    /// Grace period during which a stale snapshot is still trusted.
    pub snapshot_grace: Duration,

    /// Timeout for remote store requests.
    pub remote_timeout: Duration,

    /// Ceiling for the commit retry backoff.
    pub backoff_ceiling: Duration,
}

fn env_duration_secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    match std::env::var(key) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("{key} must be an integer number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `LARDER_API_TOKENS`: Comma-separated list of valid API tokens
    ///
    /// Optional environment variables:
    /// - `LARDER_BIND_ADDR`: Server bind address (default: "0.0.0.0:8080")
    /// - `LARDER_DATA_DIR`: Segment directory (default: "./data/segments")
    /// - `LARDER_REMOTE_URL`: Remote dataset API URL (default: "http://localhost:8900")
    /// - `LARDER_REMOTE_DATASET`: Dataset identifier (default: "recipes")
    /// - `LARDER_REMOTE_TOKEN`: Bearer token for the remote API
    /// - `LARDER_METRICS_PORT`: Prometheus exporter port, 0 disables (default: 9090)
    /// - `LARDER_FLUSH_INTERVAL_SECS` (default: 30)
    /// - `LARDER_SEGMENT_MAX_ENTRIES` (default: 500)
    /// - `LARDER_SEGMENT_MAX_AGE_SECS` (default: 300)
    /// - `LARDER_SNAPSHOT_STALENESS_SECS` (default: 60)
    /// - `LARDER_SNAPSHOT_GRACE_SECS` (default: 300)
    /// - `LARDER_REMOTE_TIMEOUT_SECS` (default: 10)
    /// - `LARDER_BACKOFF_CEILING_SECS` (default: 600)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("LARDER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("LARDER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/segments"));

        let remote_url = std::env::var("LARDER_REMOTE_URL")
            .unwrap_or_else(|_| "http://localhost:8900".to_string())
            .trim_end_matches('/')
            .to_string();

        let remote_dataset =
            std::env::var("LARDER_REMOTE_DATASET").unwrap_or_else(|_| "recipes".to_string());

        let remote_token = std::env::var("LARDER_REMOTE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let tokens_str = std::env::var("LARDER_API_TOKENS")
            .map_err(|_| anyhow::anyhow!("LARDER_API_TOKENS environment variable is required"))?;

        let api_tokens: HashSet<String> = tokens_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if api_tokens.is_empty() {
            anyhow::bail!("LARDER_API_TOKENS must contain at least one token");
        }

        let metrics_port: u16 = std::env::var("LARDER_METRICS_PORT")
            .unwrap_or_else(|_| "9090".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("LARDER_METRICS_PORT must be a port number"))?;

        let segment_max_entries: usize = std::env::var("LARDER_SEGMENT_MAX_ENTRIES")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("LARDER_SEGMENT_MAX_ENTRIES must be an integer"))?;

        let config = Self {
            bind_addr,
            data_dir,
            remote_url,
            remote_dataset,
            remote_token,
            api_tokens,
            metrics_port,
            flush_interval: env_duration_secs("LARDER_FLUSH_INTERVAL_SECS", 30)?,
            segment_max_entries,
            segment_max_age: env_duration_secs("LARDER_SEGMENT_MAX_AGE_SECS", 300)?,
            snapshot_staleness: env_duration_secs("LARDER_SNAPSHOT_STALENESS_SECS", 60)?,
            snapshot_grace: env_duration_secs("LARDER_SNAPSHOT_GRACE_SECS", 300)?,
            remote_timeout: env_duration_secs("LARDER_REMOTE_TIMEOUT_SECS", 10)?,
            backoff_ceiling: env_duration_secs("LARDER_BACKOFF_CEILING_SECS", 600)?,
        };

        tracing::info!(
            bind_addr = %config.bind_addr,
            data_dir = %config.data_dir.display(),
            remote_url = %config.remote_url,
            remote_dataset = %config.remote_dataset,
            token_count = config.api_tokens.len(),
            flush_interval_secs = config.flush_interval.as_secs(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Pipeline configuration derived from this server configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            buffer: BufferConfig {
                data_dir: self.data_dir.clone(),
                max_segment_entries: self.segment_max_entries,
                max_segment_age: self.segment_max_age,
                ..Default::default()
            },
            dedup: DedupConfig {
                staleness_window: self.snapshot_staleness,
                grace_period: self.snapshot_grace,
            },
            scheduler: SchedulerConfig {
                flush_interval: self.flush_interval,
                backoff_ceiling: self.backoff_ceiling,
            },
        }
    }

    /// Remote store configuration derived from this server configuration.
    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            base_url: self.remote_url.clone(),
            dataset: self.remote_dataset.clone(),
            token: self.remote_token.clone(),
            request_timeout: self.remote_timeout,
        }
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ingestion pipeline handling submissions.
    pub pipeline: Arc<IngestPipeline>,

    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Opens the durable buffer (recovering any previous state) and wires
    /// the pipeline against the configured remote dataset.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(HttpRemoteStore::new(config.remote_config())?) as Arc<dyn RemoteStore>;
        let pipeline = Arc::new(IngestPipeline::open(config.pipeline_config(), store)?);

        Ok(Self {
            pipeline,
            config: Arc::new(config),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "LARDER_BIND_ADDR",
        "LARDER_DATA_DIR",
        "LARDER_REMOTE_URL",
        "LARDER_REMOTE_DATASET",
        "LARDER_REMOTE_TOKEN",
        "LARDER_API_TOKENS",
        "LARDER_METRICS_PORT",
        "LARDER_FLUSH_INTERVAL_SECS",
        "LARDER_SEGMENT_MAX_ENTRIES",
        "LARDER_SEGMENT_MAX_AGE_SECS",
        "LARDER_SNAPSHOT_STALENESS_SECS",
        "LARDER_SNAPSHOT_GRACE_SECS",
        "LARDER_REMOTE_TIMEOUT_SECS",
        "LARDER_BACKOFF_CEILING_SECS",
    ];

    /// Helper to run config tests with isolated env vars.
    /// Uses a mutex to prevent concurrent env var races.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_requires_api_tokens() {
        with_env_vars(&[], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[("LARDER_API_TOKENS", "secret")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.bind_addr, "0.0.0.0:8080");
            assert_eq!(config.remote_url, "http://localhost:8900");
            assert_eq!(config.remote_dataset, "recipes");
            assert!(config.remote_token.is_none());
            assert_eq!(config.flush_interval, Duration::from_secs(30));
            assert_eq!(config.segment_max_entries, 500);
            assert_eq!(config.snapshot_staleness, Duration::from_secs(60));
            assert_eq!(config.backoff_ceiling, Duration::from_secs(600));
            assert!(config.api_tokens.contains("secret"));
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("LARDER_API_TOKENS", "a, b,,"),
                ("LARDER_BIND_ADDR", "127.0.0.1:9999"),
                ("LARDER_REMOTE_URL", "https://datasets.example.com/"),
                ("LARDER_FLUSH_INTERVAL_SECS", "5"),
                ("LARDER_SEGMENT_MAX_ENTRIES", "2"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.bind_addr, "127.0.0.1:9999");
                // Trailing slash is stripped
                assert_eq!(config.remote_url, "https://datasets.example.com");
                assert_eq!(config.flush_interval, Duration::from_secs(5));
                assert_eq!(config.segment_max_entries, 2);
                assert_eq!(config.api_tokens.len(), 2);
            },
        );
    }

    #[test]
    fn config_rejects_bad_numbers() {
        with_env_vars(
            &[
                ("LARDER_API_TOKENS", "secret"),
                ("LARDER_FLUSH_INTERVAL_SECS", "soon"),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn pipeline_config_carries_tuning() {
        with_env_vars(
            &[
                ("LARDER_API_TOKENS", "secret"),
                ("LARDER_SEGMENT_MAX_ENTRIES", "7"),
                ("LARDER_SNAPSHOT_STALENESS_SECS", "11"),
            ],
            || {
                let config = Config::from_env().unwrap();
                let pipeline = config.pipeline_config();
                assert_eq!(pipeline.buffer.max_segment_entries, 7);
                assert_eq!(pipeline.dedup.staleness_window, Duration::from_secs(11));
            },
        );
    }
}
