use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// One cached artifact as recorded in the key-value index.
///
/// The index is the authority for cache-hit decisions; the blob store is
/// the authority for whether the bytes at `storage_path` still exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: CacheKey,
    pub storage_path: String,
    pub source_identity: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

impl IndexEntry {
    pub fn new(
        key: CacheKey,
        storage_path: impl Into<String>,
        source_identity: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            key,
            storage_path: storage_path.into(),
            source_identity: source_identity.into(),
            width,
            height,
            created_at: Utc::now(),
        }
    }
}
