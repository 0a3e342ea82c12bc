use super::validation::parse_header;
use super::{ConfigError, LogFormat, LogLevel, StorageKind};
use crate::delivery::DeliveryConfig;
use crate::pipeline::{BackoffConfig, BackoffStrategy, PipelineConfig};
use crate::storage::FileBackendConfig;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Buffers behavior events from stdin and relays them to a collector", long_about = None)]
#[serde(default)]
pub struct RelayConfig {
    /// Collector base URL
    #[arg(long, env = "RELAY_BASE_URL", default_value = "http://localhost:9700")]
    pub base_url: String,

    /// Collector path batches are posted to
    #[arg(long, env = "RELAY_ENDPOINT", default_value = "events")]
    pub endpoint: String,

    /// Upload request timeout in milliseconds
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Flush interval in milliseconds
    #[arg(long, env = "RELAY_FLUSH_INTERVAL_MS", default_value = "30000")]
    pub flush_interval_ms: u64,

    /// Maximum events per upload
    #[arg(long, env = "RELAY_MAX_BATCH_ITEMS", default_value = "100")]
    pub max_batch_items: usize,

    /// Maximum serialized bytes per upload
    #[arg(long, env = "RELAY_MAX_BATCH_BYTES", default_value = "262144")]
    pub max_batch_bytes: usize,

    /// In-memory buffer ceiling in serialized bytes
    #[arg(long, env = "RELAY_BUFFER_BYTE_CEILING", default_value = "1048576")]
    pub buffer_byte_ceiling: usize,

    /// Optional in-memory buffer ceiling in events
    #[arg(long, env = "RELAY_BUFFER_MAX_ITEMS")]
    pub buffer_max_items: Option<usize>,

    /// Extra request header as NAME=VALUE (repeatable)
    #[arg(long = "header", env = "RELAY_EXTRA_HEADERS", value_delimiter = ',')]
    pub extra_headers: Vec<String>,

    /// Probe the collector before each flush
    #[arg(long, env = "RELAY_CHECK_CONNECTIVITY", default_value_t = true, action = ArgAction::Set)]
    pub check_connectivity: bool,

    /// Collector health path used by the connectivity probe
    #[arg(long, env = "RELAY_HEALTH_PATH", default_value = "health")]
    pub health_path: String,

    /// Store key of the pending-event queue
    #[arg(long, env = "RELAY_STORAGE_KEY", default_value = "event-relay.pending")]
    pub storage_key: String,

    /// Maximum events kept in the stored queue
    #[arg(long, env = "RELAY_STORED_QUEUE_MAX_EVENTS", default_value = "10000")]
    pub stored_queue_max_events: usize,

    /// Storage backend
    #[arg(long, env = "RELAY_STORAGE_BACKEND", default_value = "file")]
    pub storage_backend: StorageKind,

    /// Storage directory for the file and sled backends
    #[arg(long, env = "RELAY_STORAGE_DIR", default_value = "/tmp/event-relay")]
    pub storage_dir: PathBuf,

    /// Storage quota across all keys in MB
    #[arg(long, env = "RELAY_STORAGE_LIMIT_MB", default_value = "50")]
    pub storage_limit_mb: u64,

    /// Gzip values written by the file backend
    #[arg(long, env = "RELAY_STORAGE_COMPRESSION")]
    pub storage_compression: bool,

    /// Base delay of the failure backoff in milliseconds
    #[arg(long, env = "RELAY_BACKOFF_BASE_DELAY_MS", default_value = "30000")]
    pub backoff_base_delay_ms: u64,

    /// Longest failure backoff in milliseconds
    #[arg(long, env = "RELAY_BACKOFF_MAX_DELAY_MS", default_value = "600000")]
    pub backoff_max_delay_ms: u64,

    /// Randomize backoff delays by +/-50%
    #[arg(long, env = "RELAY_BACKOFF_JITTER", default_value_t = true, action = ArgAction::Set)]
    pub backoff_jitter: bool,

    /// Log level
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "RELAY_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Flush pending events before exiting at end of input
    #[arg(long, env = "RELAY_DRAIN_ON_EXIT", default_value_t = true, action = ArgAction::Set)]
    pub drain_on_exit: bool,

    /// Seconds between diagnostics reports; 0 disables them
    #[arg(long, env = "RELAY_DIAGNOSTICS_INTERVAL_SECS", default_value = "60")]
    pub diagnostics_interval_secs: u64,

    /// Write Prometheus text metrics to this file with every diagnostics report
    #[arg(long, env = "RELAY_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,

    /// Configuration file path (optional)
    #[arg(long, env = "RELAY_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub flush_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub header_map: BTreeMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9700".to_string(),
            endpoint: "events".to_string(),
            request_timeout_ms: 10_000,
            flush_interval_ms: 30_000,
            max_batch_items: 100,
            max_batch_bytes: 256 * 1024,
            buffer_byte_ceiling: 1024 * 1024,
            buffer_max_items: None,
            extra_headers: Vec::new(),
            check_connectivity: true,
            health_path: "health".to_string(),
            storage_key: "event-relay.pending".to_string(),
            stored_queue_max_events: 10_000,
            storage_backend: StorageKind::File,
            storage_dir: PathBuf::from("/tmp/event-relay"),
            storage_limit_mb: 50,
            storage_compression: false,
            backoff_base_delay_ms: 30_000,
            backoff_max_delay_ms: 600_000,
            backoff_jitter: true,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            drain_on_exit: true,
            diagnostics_interval_secs: 60,
            metrics_file: None,
            config_file: None,
            flush_interval: Duration::from_millis(30_000),
            request_timeout: Duration::from_millis(10_000),
            header_map: BTreeMap::new(),
        }
    }
}

impl RelayConfig {
    /// Parse CLI arguments (with `RELAY_*` fallbacks). A `--config-file` replaces them entirely.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = RelayConfig::parse_from(args);

        if let Some(path) = config.config_file.clone() {
            return Self::from_file(path);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: RelayConfig = toml::from_str(&content)?;
        config.config_file = Some(path.as_ref().to_path_buf());
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.flush_interval = Duration::from_millis(self.flush_interval_ms);
        self.request_timeout = Duration::from_millis(self.request_timeout_ms);

        self.header_map = self
            .extra_headers
            .iter()
            .map(|raw| parse_header(raw))
            .collect::<Result<_, _>>()?;

        Ok(())
    }

    pub fn storage_limit_bytes(&self) -> u64 {
        self.storage_limit_mb.saturating_mul(1024 * 1024)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            endpoint: self.endpoint.clone(),
            flush_interval: self.flush_interval,
            max_batch_items: self.max_batch_items,
            max_batch_bytes: self.max_batch_bytes,
            buffer_byte_ceiling: self.buffer_byte_ceiling,
            buffer_max_items: self.buffer_max_items,
            storage_key: self.storage_key.clone(),
            stored_queue_max_events: self.stored_queue_max_events,
            check_connectivity: self.check_connectivity,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.backoff_base_delay_ms),
                max_delay: Duration::from_millis(self.backoff_max_delay_ms),
                strategy: BackoffStrategy::Exponential,
                jitter: self.backoff_jitter,
            },
        }
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        let defaults = DeliveryConfig::default();
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());

        DeliveryConfig {
            base_url: self.base_url.clone(),
            request_timeout: self.request_timeout,
            health_path: self.health_path.clone(),
            extra_headers: self.header_map.clone(),
            user_agent: format!("event-relay/{} ({host})", env!("CARGO_PKG_VERSION")),
            ..defaults
        }
    }

    pub fn file_backend_config(&self) -> FileBackendConfig {
        FileBackendConfig {
            storage_path: self.storage_dir.clone(),
            max_disk_usage: self.storage_limit_bytes(),
            compression: self.storage_compression,
        }
    }
}
