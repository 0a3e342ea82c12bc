//! Event pipeline: buffering, the stored retry queue, batching and the flush cycle.

pub mod backoff;
pub mod batch;
pub mod buffer;
pub mod config;
pub mod event_pipeline;
pub mod metrics;
pub mod stats;
pub mod stored_queue;

pub use backoff::{BackoffConfig, BackoffStrategy, FlushBackoff};
pub use batch::{BatchLimits, UploadBatch};
pub use buffer::EventBuffer;
pub use config::PipelineConfig;
pub use event_pipeline::{EventPipeline, FlushOutcome, ShutdownReport, SkipReason};
pub use metrics::{MetricsError, render_metrics};
pub use stats::{Diagnostics, PipelinePhase, PipelineStats};
pub use stored_queue::{AppendResult, StoredQueue};
