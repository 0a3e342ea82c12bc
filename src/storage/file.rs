use super::backend::{StorageBackend, StorageError, StorageInfo, check_quota, validate_key};
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const VALUE_EXTENSION: &str = "value";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Debug, Clone)]
pub struct FileBackendConfig {
    pub storage_path: PathBuf,
    pub max_disk_usage: u64, // bytes
    pub compression: bool,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("/tmp/event-relay/store"),
            max_disk_usage: 50 * 1024 * 1024, // 50MB
            compression: false,
        }
    }
}

/// One file per key under a directory, sharing one byte ceiling.
///
/// Writes go to a temp file and are renamed into place, so a crash mid-write
/// leaves the previous value intact.
pub struct FileBackend {
    config: FileBackendConfig,
}

impl FileBackend {
    pub async fn new(config: FileBackendConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.storage_path).await?;
        Ok(Self { config })
    }

    pub fn storage_path(&self) -> &Path {
        &self.config.storage_path
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.config
            .storage_path
            .join(format!("{key}.{VALUE_EXTENSION}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.config
            .storage_path
            .join(format!("{key}.{TEMP_EXTENSION}"))
    }

    fn encode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        if !self.config.compression {
            return Ok(bytes);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&bytes)?;
        Ok(encoder.finish()?)
    }

    fn decode(data: Vec<u8>) -> Vec<u8> {
        // Values written with compression toggled either way stay readable
        let mut decoder = GzDecoder::new(data.as_slice());
        let mut decompressed = Vec::new();
        match decoder.read_to_end(&mut decompressed) {
            Ok(_) => decompressed,
            Err(_) => data,
        }
    }

    /// Sizes of every stored value, keyed by storage key.
    async fn scan(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut values = Vec::new();
        let mut entries = fs::read_dir(&self.config.storage_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(file_name) = entry.file_name().to_str()
                && let Some(key) = file_name.strip_suffix(&format!(".{VALUE_EXTENSION}"))
            {
                values.push((key.to_string(), entry.metadata().await?.len()));
            }
        }

        values.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(values)
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        match fs::read(self.value_path(key)).await {
            Ok(data) => Ok(Self::decode(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let data = self.encode(bytes)?;

        let values = self.scan().await?;
        let current: u64 = values.iter().map(|(_, size)| size).sum();
        let previous = values
            .iter()
            .find(|(name, _)| name == key)
            .map_or(0, |(_, size)| *size);
        check_quota(current, previous, data.len() as u64, self.config.max_disk_usage)?;

        let temp_path = self.temp_path(key);
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, self.value_path(key)).await?;

        tracing::debug!("Stored key {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        match fs::remove_file(self.value_path(key)).await {
            Ok(()) => {
                tracing::debug!("Deleted key {key}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn info(&self) -> Result<StorageInfo, StorageError> {
        let values = self.scan().await?;
        Ok(StorageInfo {
            current_size: values.iter().map(|(_, size)| size).sum(),
            limit_size: self.config.max_disk_usage,
            keys: values.into_iter().map(|(key, _)| key).collect(),
        })
    }
}
