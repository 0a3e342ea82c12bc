use super::backend::{StorageBackend, StorageError, StorageInfo, check_quota, validate_key};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-process backend with the same quota semantics as the on-disk ones.
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    limit: u64,
}

impl MemoryBackend {
    pub fn new(limit: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            limit,
        }
    }

    fn current_usage(entries: &BTreeMap<String, Vec<u8>>) -> u64 {
        entries.values().map(|v| v.len() as u64).sum()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024) // 10MB
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut entries = self.entries.lock();
        let previous = entries.get(key).map_or(0, |v| v.len() as u64);
        check_quota(
            Self::current_usage(&entries),
            previous,
            bytes.len() as u64,
            self.limit,
        )?;
        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.entries
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn info(&self) -> Result<StorageInfo, StorageError> {
        let entries = self.entries.lock();
        Ok(StorageInfo {
            current_size: Self::current_usage(&entries),
            limit_size: self.limit,
            keys: entries.keys().cloned().collect(),
        })
    }
}
