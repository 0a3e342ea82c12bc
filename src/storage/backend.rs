use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Storage quota exceeded: requested {requested} bytes, limit {limit} bytes")]
    QuotaExceeded { requested: u64, limit: u64 },
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "disk-fallback")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Snapshot of quota consumption across every key of a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub current_size: u64,
    pub limit_size: u64,
    pub keys: Vec<String>,
}

impl StorageInfo {
    pub fn usage_percentage(&self) -> f64 {
        if self.limit_size == 0 {
            return 0.0;
        }
        (self.current_size as f64 / self.limit_size as f64) * 100.0
    }
}

/// Raw key/value store with a single global byte ceiling.
///
/// Backends report every failure; `PersistentStore` turns them into sentinels.
/// `read` and `delete` return `StorageError::NotFound` for absent keys.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn info(&self) -> Result<StorageInfo, StorageError>;
}

/// Keys map to file names and sled keys, so they are restricted to a safe alphabet.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.len() <= 200
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !key.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Fail with `QuotaExceeded` if replacing `previous` bytes with `incoming` would cross `limit`.
pub(crate) fn check_quota(current: u64, previous: u64, incoming: u64, limit: u64) -> Result<(), StorageError> {
    let projected = current.saturating_sub(previous) + incoming;
    if projected > limit {
        return Err(StorageError::QuotaExceeded {
            requested: projected,
            limit,
        });
    }
    Ok(())
}
