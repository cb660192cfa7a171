use async_trait::async_trait;
use thiserror::Error;

/// Errors from a raw index backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("index IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index record: {0}")]
    Corrupt(String),
}

/// Raw string-keyed persistence under the index.
///
/// The index layers namespacing, serialization, and locking on top;
/// backends only move opaque values.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// All stored keys starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Drop every record.
    async fn clear(&self) -> Result<(), KvError>;
}
