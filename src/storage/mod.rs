pub mod adapter;
pub mod backend;
pub mod file;
pub mod memory;
#[cfg(feature = "disk-fallback")]
pub mod sled_backend;

pub use adapter::PersistentStore;
pub use backend::{StorageBackend, StorageError, StorageInfo};
pub use file::{FileBackend, FileBackendConfig};
pub use memory::MemoryBackend;
#[cfg(feature = "disk-fallback")]
pub use sled_backend::SledBackend;
