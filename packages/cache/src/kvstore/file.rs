use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use super::backend::{KvBackend, KvError};

/// Durable file-per-record index backend.
///
/// Records live under `<root>/<2-hex>/<62-hex>.json`, named by the SHA-256
/// of the record key. The original key is stored inside the record so
/// prefix scans can recover it. Writes stage in `.tmp` and rename into
/// place.
pub struct FileBackend {
    root: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

impl FileBackend {
    pub async fn new(root: PathBuf) -> Result<Self, KvError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root
            .join(&digest[..2])
            .join(format!("{}.json", &digest[2..]))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match fs::read_to_string(self.record_path(key)).await {
            Ok(raw) => {
                let record: Record = serde_json::from_str(&raw)
                    .map_err(|e| KvError::Corrupt(e.to_string()))?;
                Ok(Some(record.value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let record = serde_json::to_string(&Record {
            key: key.to_string(),
            value: value.to_string(),
        })
        .map_err(|e| KvError::Corrupt(e.to_string()))?;

        let target = self.record_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        if let Err(e) = fs::write(&temp, &record).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut keys = Vec::new();
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() || shard.file_name() == ".tmp" {
                continue;
            }
            let mut records = fs::read_dir(shard.path()).await?;
            while let Some(entry) = records.next_entry().await? {
                let raw = match fs::read_to_string(entry.path()).await {
                    Ok(raw) => raw,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let record: Record = serde_json::from_str(&raw)
                    .map_err(|e| KvError::Corrupt(e.to_string()))?;
                if record.key.starts_with(prefix) {
                    keys.push(record.key);
                }
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), KvError> {
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if shard.file_type().await?.is_dir() && shard.file_name() != ".tmp" {
                fs::remove_dir_all(shard.path()).await?;
            }
        }
        Ok(())
    }
}
