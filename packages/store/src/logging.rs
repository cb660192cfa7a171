use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::StorageError;
use super::traits::{BlobStore, BoxReader};

/// Decorator that logs every delegated storage call.
///
/// Wraps any [`BlobStore`]; composition keeps the wrapped implementation
/// swappable without touching its type.
pub struct LoggingStore {
    inner: Arc<dyn BlobStore>,
}

impl LoggingStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BlobStore for LoggingStore {
    async fn save(&self, path: &str, data: &[u8]) -> Result<String, StorageError> {
        debug!(path, bytes = data.len(), "save");
        self.inner.save(path, data).await
    }

    async fn open(&self, path: &str) -> Result<BoxReader, StorageError> {
        debug!(path, "open");
        self.inner.open(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        debug!(path, "exists");
        self.inner.exists(path).await
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        debug!(path, "delete");
        self.inner.delete(path).await
    }

    fn url(&self, path: &str) -> String {
        self.inner.url(path)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        debug!(path, "size");
        self.inner.size(path).await
    }
}
