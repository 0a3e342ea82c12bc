use super::backoff::BackoffConfig;
use super::batch::BatchLimits;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Collector path the batches are posted to, relative to the delivery base URL.
    pub endpoint: String,
    pub flush_interval: Duration,
    pub max_batch_items: usize,
    pub max_batch_bytes: usize,
    pub buffer_byte_ceiling: usize,
    pub buffer_max_items: Option<usize>,
    pub storage_key: String,
    pub stored_queue_max_events: usize,
    /// Probe the collector before each flush and skip the cycle when it is unreachable.
    pub check_connectivity: bool,
    pub backoff: BackoffConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: "events".to_string(),
            flush_interval: Duration::from_millis(30_000),
            max_batch_items: 100,
            max_batch_bytes: 256 * 1024,
            buffer_byte_ceiling: 1024 * 1024,
            buffer_max_items: None,
            storage_key: "event-relay.pending".to_string(),
            stored_queue_max_events: 10_000,
            check_connectivity: true,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_items: self.max_batch_items,
            max_bytes: self.max_batch_bytes,
        }
    }

    /// Key holding the next sequence number across restarts.
    pub fn cursor_key(&self) -> String {
        format!("{}.cursor", self.storage_key)
    }
}
