#![deny(rust_2024_compatibility)]
#![warn(rust_2018_idioms)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. StorageError in storage module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod delivery;
pub mod domain;
pub mod pipeline;
pub mod storage;
pub mod timer;

// Re-export main types for easy access
pub use app::{App, RelayConfig};
pub use delivery::{Connectivity, ConnectionKind, Delivery, DeliveryError, HttpDelivery};
pub use domain::{Event, EventRecord};
pub use pipeline::{EventPipeline, FlushOutcome, PipelineConfig, PipelineStats};
pub use storage::{PersistentStore, StorageInfo};
pub use timer::{TimerHandle, TimerRegistry, TimerStats};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
