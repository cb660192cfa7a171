use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::BufReader;

use super::error::StorageError;
use super::traits::{BlobStore, BoxReader};

/// Filesystem-backed blob store.
///
/// Writes land in a `.tmp` staging directory first and are renamed into
/// place, so a failed or interrupted write never leaves a partial blob at
/// its final path.
pub struct FilesystemStore {
    root: PathBuf,
    base_url: String,
}

impl FilesystemStore {
    /// Create a new filesystem store rooted at `root`, serving URLs under
    /// `base_url`.
    pub async fn new(root: PathBuf, base_url: impl Into<String>) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { root, base_url })
    }

    /// Resolve a relative blob path under the storage root.
    ///
    /// Only plain path segments are accepted; `..`, `.`, absolute paths, and
    /// prefix components are rejected.
    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath("<empty>".into()));
        }
        let rel = Path::new(path);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn save(&self, path: &str, data: &[u8]) -> Result<String, StorageError> {
        let target = self.full_path(path)?;

        let temp = self.temp_path();
        if let Err(e) = fs::write(&temp, data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        Ok(path.to_string())
    }

    async fn open(&self, path: &str) -> Result<BoxReader, StorageError> {
        let target = self.full_path(path)?;
        match fs::File::open(&target).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.full_path(path)?;
        Ok(fs::try_exists(&target).await?)
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.full_path(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let target = self.full_path(path)?;
        match fs::metadata(&target).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
