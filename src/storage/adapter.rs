use super::backend::{StorageBackend, StorageError, StorageInfo};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key-addressed store that never fails.
///
/// Every backend failure is logged and converted to a sentinel: `None` for
/// reads, `false` for writes, a zeroed `StorageInfo` for quota queries. Storage
/// faults are not actionable for callers, so nothing here returns an error.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn StorageBackend>,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.read(key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                debug!("Storage key {} not found", key);
                return None;
            }
            Err(e) => {
                warn!("Storage read failed for key {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Stored value for key {} could not be decoded: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Value for key {} could not be serialized: {}", key, e);
                return false;
            }
        };

        match self.backend.write(key, bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Storage write failed for key {}: {}", key, e);
                false
            }
        }
    }

    /// Read-modify-write concatenation onto the sequence stored under `key`.
    ///
    /// An absent value or one that is not a sequence counts as empty. A read
    /// that fails for any other reason aborts the append so the stored value
    /// is never overwritten with a partial sequence. On failure nothing is
    /// written and `false` is returned.
    pub async fn append<T: Serialize>(&self, key: &str, items: &[T]) -> bool {
        let existing = match self.backend.read(key).await {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => {
                warn!("Storage read failed for key {}, append aborted: {}", key, e);
                return false;
            }
        };

        let mut sequence = match existing {
            Some(Value::Array(existing)) => existing,
            Some(_) => {
                warn!("Stored value for key {} is not a sequence, replacing it", key);
                Vec::new()
            }
            None => Vec::new(),
        };

        for item in items {
            match serde_json::to_value(item) {
                Ok(value) => sequence.push(value),
                Err(e) => {
                    warn!("Item for key {} could not be serialized: {}", key, e);
                    return false;
                }
            }
        }

        self.set(key, &Value::Array(sequence)).await
    }

    /// Removing an absent key counts as success.
    pub async fn remove(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => true,
            Err(e) => {
                warn!("Storage remove failed for key {}: {}", key, e);
                false
            }
        }
    }

    pub async fn info(&self) -> StorageInfo {
        match self.backend.info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("Storage info unavailable: {}", e);
                StorageInfo::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use tracing_test::traced_test;

    /// Backend whose every operation fails with a transport-level fault.
    struct BrokenBackend;

    #[async_trait]
    impl StorageBackend for BrokenBackend {
        async fn read(&self, _key: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::Backend("disk unplugged".to_string()))
        }

        async fn write(&self, _key: &str, _bytes: Vec<u8>) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk unplugged".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk unplugged".to_string()))
        }

        async fn info(&self) -> Result<StorageInfo, StorageError> {
            Err(StorageError::Backend("disk unplugged".to_string()))
        }
    }

    fn memory_store(limit: u64) -> PersistentStore {
        PersistentStore::new(Arc::new(MemoryBackend::new(limit)))
    }

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let store = memory_store(1024);

        assert!(store.set("profile", &json!({"level": 3})).await);
        let value: Option<Value> = store.get("profile").await;
        assert_eq!(value, Some(json!({"level": 3})));

        let missing: Option<Value> = store.get("absent").await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_append_concatenates_in_order() {
        let store = memory_store(1024);

        assert!(store.append("queue", &[1, 2]).await);
        assert!(store.append("queue", &[3]).await);

        let value: Option<Vec<u32>> = store.get("queue").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_append_replaces_value_of_wrong_shape() {
        let store = memory_store(1024);

        assert!(store.set("queue", &json!({"legacy": true})).await);
        assert!(store.append("queue", &["a"]).await);

        let value: Option<Value> = store.get("queue").await;
        assert_eq!(value, Some(json!(["a"])));
    }

    #[tokio::test]
    async fn test_append_failure_leaves_previous_value() {
        let store = memory_store(16);

        assert!(store.append("queue", &[1]).await);
        assert!(!store.append("queue", &["a value far too long for the quota"]).await);

        let value: Option<Vec<u32>> = store.get("queue").await;
        assert_eq!(value, Some(vec![1]));
    }

    /// Memory backend whose next read fails once.
    struct FlakyRead {
        inner: MemoryBackend,
        fail_next_read: parking_lot::Mutex<bool>,
    }

    #[async_trait]
    impl StorageBackend for FlakyRead {
        async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            if std::mem::take(&mut *self.fail_next_read.lock()) {
                return Err(StorageError::Backend("transient read fault".to_string()));
            }
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
            self.inner.write(key, bytes).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }

        async fn info(&self) -> Result<StorageInfo, StorageError> {
            self.inner.info().await
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_append_after_read_fault_keeps_existing_sequence() {
        let backend = Arc::new(FlakyRead {
            inner: MemoryBackend::new(1024),
            fail_next_read: parking_lot::Mutex::new(false),
        });
        let store = PersistentStore::new(backend.clone());

        assert!(store.append("queue", &[1, 2, 3]).await);

        *backend.fail_next_read.lock() = true;
        assert!(!store.append("queue", &[4]).await);
        assert!(logs_contain("append aborted"));

        let value: Option<Vec<u32>> = store.get("queue").await;
        assert_eq!(value, Some(vec![1, 2, 3]));

        assert!(store.append("queue", &[4]).await);
        let value: Option<Vec<u32>> = store.get("queue").await;
        assert_eq!(value, Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = memory_store(1024);

        assert!(store.set("k", &1).await);
        assert!(store.remove("k").await);
        assert!(store.remove("k").await);
        assert!(store.remove("never-set").await);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_set_over_quota_returns_false_and_warns() {
        let store = memory_store(8);

        let ok = store.set("big", &"exceed max size".repeat(4)).await;

        assert!(!ok);
        assert!(logs_contain("Storage write failed for key big"));
        assert!(logs_contain("quota exceeded"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_broken_backend_degrades_to_sentinels() {
        let store = PersistentStore::new(Arc::new(BrokenBackend));

        let value: Option<Value> = store.get("k").await;
        assert!(value.is_none());
        assert!(!store.set("k", &1).await);
        assert!(!store.append("k", &[1]).await);
        assert!(!store.remove("k").await);
        assert_eq!(store.info().await, StorageInfo::default());
        assert!(logs_contain("disk unplugged"));
    }

    #[tokio::test]
    async fn test_info_lists_keys() {
        let store = memory_store(1024);
        assert!(store.set("a", &1).await);
        assert!(store.set("b", &22).await);

        let info = store.info().await;
        assert_eq!(info.keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(info.current_size, 3);
        assert_eq!(info.limit_size, 1024);
    }
}
