use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Path-addressed blob storage.
///
/// Paths are relative, `/`-separated names chosen by the caller; the store
/// never invents or rewrites them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `path`, returning the stored path.
    async fn save(&self, path: &str, data: &[u8]) -> Result<String, StorageError>;

    /// Open a blob as a streaming async reader.
    async fn open(&self, path: &str) -> Result<BoxReader, StorageError>;

    /// Read all bytes of a blob.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open(path).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Check whether a blob exists.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Public URL for a stored blob.
    fn url(&self, path: &str) -> String;

    /// Get the size of a blob in bytes.
    async fn size(&self, path: &str) -> Result<u64, StorageError>;
}
