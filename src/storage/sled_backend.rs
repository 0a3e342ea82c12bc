use super::backend::{StorageBackend, StorageError, StorageInfo, check_quota, validate_key};
use async_trait::async_trait;
use std::path::Path;

/// `sled` tree backend with a global byte ceiling over all values.
pub struct SledBackend {
    db: sled::Db,
    limit: u64,
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path>, limit: u64) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db, limit })
    }

    fn current_usage(&self) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for entry in self.db.iter() {
            let (_, value) = entry?;
            total += value.len() as u64;
        }
        Ok(total)
    }
}

#[async_trait]
impl StorageBackend for SledBackend {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        self.db
            .get(key)?
            .map(|value| value.to_vec())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let previous = self.db.get(key)?.map_or(0, |v| v.len() as u64);
        check_quota(self.current_usage()?, previous, bytes.len() as u64, self.limit)?;

        self.db.insert(key, bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        match self.db.remove(key)? {
            Some(_) => {
                self.db.flush_async().await?;
                Ok(())
            }
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn info(&self) -> Result<StorageInfo, StorageError> {
        let mut keys = Vec::new();
        let mut current_size = 0u64;
        for entry in self.db.iter() {
            let (key, value) = entry?;
            current_size += value.len() as u64;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(StorageInfo {
            current_size,
            limit_size: self.limit,
            keys,
        })
    }
}
