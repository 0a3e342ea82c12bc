pub mod registry;

pub use registry::{ActiveTimers, TimerHandle, TimerId, TimerKind, TimerRegistry, TimerStats};
