use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::options::TransformOptions;

/// Deterministic cache key for one derived artifact.
///
/// A SHA-256 digest over the source identity, the canonical option
/// encoding, and an optional source content fingerprint. Identical inputs
/// always produce the identical key; no process-local state is involved.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Key for a derived artifact.
    ///
    /// A fingerprint, when supplied, salts the digest so that changed
    /// source bytes produce a different key without an explicit delete.
    pub fn build(
        identity: &str,
        options: &TransformOptions,
        fingerprint: Option<&str>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identity.as_bytes());
        hasher.update([0]);
        hasher.update(options.canonical().as_bytes());
        if let Some(fingerprint) = fingerprint {
            hasher.update([0]);
            hasher.update(fingerprint.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Key under which a source's own metadata entry is stored.
    pub fn source(identity: &str) -> Self {
        Self(Sha256::digest(identity.as_bytes()).into())
    }

    /// Parse a hex-encoded cache key.
    pub fn from_hex(s: &str) -> Result<Self, CacheError> {
        if s.len() != 64 {
            return Err(CacheError::InvalidReference(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| CacheError::InvalidReference(format!("invalid hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CacheError::InvalidReference("decoded to wrong length".into()))?;
        Ok(Self(arr))
    }

    /// Return the key as a 64-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 2 hex characters; bounds directory fan-out in storage paths.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Remaining 62 hex characters.
    pub fn shard_suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Derived storage path: `<cache_root>/<2-hex shard>/<62-hex>.<ext>`.
    ///
    /// The 2-character shard width is part of the on-disk contract;
    /// changing it would orphan every existing artifact.
    pub fn storage_path(&self, cache_root: &str, extension: &str) -> String {
        format!(
            "{}/{}/{}.{}",
            cache_root.trim_end_matches('/'),
            self.shard_prefix(),
            self.shard_suffix(),
            extension
        )
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for CacheKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
