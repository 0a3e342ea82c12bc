use event_relay::storage::{
    FileBackend, FileBackendConfig, MemoryBackend, PersistentStore, StorageBackend, StorageError,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

async fn file_backend(dir: &TempDir, limit: u64, compression: bool) -> FileBackend {
    FileBackend::new(FileBackendConfig {
        storage_path: dir.path().join("store"),
        max_disk_usage: limit,
        compression,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_file_backend_write_read_delete() {
    let temp_dir = TempDir::new().unwrap();
    let backend = file_backend(&temp_dir, 1024 * 1024, false).await;

    backend.write("pending", b"[1,2,3]".to_vec()).await.unwrap();
    assert_eq!(backend.read("pending").await.unwrap(), b"[1,2,3]");
    assert!(temp_dir.path().join("store/pending.value").exists());

    backend.delete("pending").await.unwrap();
    assert!(matches!(
        backend.read("pending").await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        backend.delete("pending").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_file_backend_compresses_values() {
    let temp_dir = TempDir::new().unwrap();
    let backend = file_backend(&temp_dir, 1024 * 1024, true).await;
    let value = vec![b'a'; 10_000];

    backend.write("big", value.clone()).await.unwrap();

    let on_disk = std::fs::read(temp_dir.path().join("store/big.value")).unwrap();
    assert_eq!(&on_disk[..2], &[0x1f, 0x8b]);
    assert!(on_disk.len() < value.len());
    assert_eq!(backend.read("big").await.unwrap(), value);

    let info = backend.info().await.unwrap();
    assert_eq!(info.current_size, on_disk.len() as u64);
}

#[tokio::test]
async fn test_file_backend_reads_values_written_without_compression() {
    let temp_dir = TempDir::new().unwrap();
    file_backend(&temp_dir, 1024, false)
        .await
        .write("plain", b"{\"a\":1}".to_vec())
        .await
        .unwrap();

    let reopened = file_backend(&temp_dir, 1024, true).await;
    assert_eq!(reopened.read("plain").await.unwrap(), b"{\"a\":1}");
}

#[tokio::test]
async fn test_file_backend_quota_spans_all_keys() {
    let temp_dir = TempDir::new().unwrap();
    let backend = file_backend(&temp_dir, 100, false).await;

    backend.write("first", vec![b'x'; 60]).await.unwrap();
    match backend.write("second", vec![b'y'; 60]).await {
        Err(StorageError::QuotaExceeded { requested, limit }) => {
            assert_eq!(requested, 120);
            assert_eq!(limit, 100);
        }
        other => panic!("Expected quota error, got {other:?}"),
    }

    // Replacing a value only counts the difference
    backend.write("first", vec![b'z'; 90]).await.unwrap();
    assert!(backend.read("second").await.is_err());

    let info = backend.info().await.unwrap();
    assert_eq!(info.current_size, 90);
    assert_eq!(info.limit_size, 100);
    assert_eq!(info.keys, vec!["first".to_string()]);
    assert!((info.usage_percentage() - 90.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_file_backend_rejects_unsafe_keys() {
    let temp_dir = TempDir::new().unwrap();
    let backend = file_backend(&temp_dir, 1024, false).await;

    for key in ["../escape", "", ".hidden", "a/b"] {
        assert!(
            matches!(backend.write(key, b"1".to_vec()).await, Err(StorageError::InvalidKey(_))),
            "key {key:?} was accepted"
        );
    }
}

#[tokio::test]
async fn test_file_backend_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = PersistentStore::new(Arc::new(file_backend(&temp_dir, 1024 * 1024, true).await));
        assert!(store.set("event-relay.pending", &json!([{"n": 1}])).await);
        assert!(store.append("event-relay.pending", &[json!({"n": 2})]).await);
    }

    let store = PersistentStore::new(Arc::new(file_backend(&temp_dir, 1024 * 1024, true).await));
    let value: Value = store.get("event-relay.pending").await.unwrap();
    assert_eq!(value, json!([{"n": 1}, {"n": 2}]));
}

#[tokio::test]
async fn test_persistent_store_reports_failures_as_sentinels() {
    let store = PersistentStore::new(Arc::new(MemoryBackend::new(32)));

    assert_eq!(store.get::<Value>("missing").await, None);
    assert!(store.remove("missing").await);

    assert!(store.set("queue", &json!([1, 2])).await);
    assert!(!store.set("queue", &json!(["this value is far too long for the quota"])).await);
    assert_eq!(store.get::<Value>("queue").await, Some(json!([1, 2])));

    assert!(!store.set("../queue", &json!([])).await);
    assert_eq!(store.get::<Vec<String>>("queue").await, None);

    let info = store.info().await;
    assert_eq!(info.limit_size, 32);
    assert_eq!(info.keys, vec!["queue".to_string()]);
}

#[tokio::test]
async fn test_append_replaces_non_sequence_values() {
    let store = PersistentStore::new(Arc::new(MemoryBackend::default()));

    assert!(store.set("queue", &json!({"not": "a list"})).await);
    assert!(store.append("queue", &[1, 2]).await);
    assert_eq!(store.get::<Vec<u32>>("queue").await, Some(vec![1, 2]));
}

#[cfg(feature = "disk-fallback")]
#[tokio::test]
async fn test_sled_backend_write_read_delete_with_quota() {
    use event_relay::storage::SledBackend;

    let temp_dir = TempDir::new().unwrap();
    let backend = SledBackend::open(temp_dir.path().join("sled"), 64).unwrap();

    backend.write("pending", b"[1]".to_vec()).await.unwrap();
    assert!(matches!(
        backend.write("other", vec![0; 64]).await,
        Err(StorageError::QuotaExceeded { .. })
    ));
    assert_eq!(backend.read("pending").await.unwrap(), b"[1]");

    let info = backend.info().await.unwrap();
    assert_eq!(info.current_size, 3);
    assert_eq!(info.keys, vec!["pending".to_string()]);

    backend.delete("pending").await.unwrap();
    assert!(matches!(
        backend.read("pending").await,
        Err(StorageError::NotFound(_))
    ));
}
