use std::sync::Arc;

use thiserror::Error;

use store::StorageError;

use crate::engine::EngineError;
use crate::kvstore::KvError;

/// Why a single thumbnail generation attempt failed.
///
/// The cause is differentiated so callers can react to a broken source
/// differently than to a storage outage.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("source does not exist: {0}")]
    MissingSource(String),

    #[error("source image could not be decoded: {0}")]
    Decode(#[source] EngineError),

    #[error("thumbnail could not be encoded: {0}")]
    Encode(#[source] EngineError),

    #[error("storing the thumbnail failed: {0}")]
    Store(#[from] StorageError),
}

/// Top-level cache error.
///
/// Generation, storage, and index causes are `Arc`-shared so the outcome of
/// one generation attempt can be handed to every caller waiting on the same
/// key.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("invalid source reference: {0}")]
    InvalidReference(String),

    #[error("invalid transform options: {0}")]
    InvalidOptions(String),

    #[error("thumbnail generation failed: {0}")]
    Generation(#[source] Arc<GenerationError>),

    #[error("storage error: {0}")]
    Storage(#[source] Arc<StorageError>),

    #[error("index backend error: {0}")]
    Index(#[source] Arc<KvError>),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<GenerationError> for CacheError {
    fn from(err: GenerationError) -> Self {
        CacheError::Generation(Arc::new(err))
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Storage(Arc::new(err))
    }
}

impl From<KvError> for CacheError {
    fn from(err: KvError) -> Self {
        CacheError::Index(Arc::new(err))
    }
}
