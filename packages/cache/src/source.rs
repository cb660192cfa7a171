use crate::error::CacheError;
use crate::identity::resolve_identity;

/// An original image referenced by the caller.
///
/// Not owned by the cache; existence is only checked against the blob
/// store once generation needs the bytes.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    reference: String,
    identity: String,
}

impl SourceAsset {
    pub fn new(reference: &str) -> Result<Self, CacheError> {
        let identity = resolve_identity(reference)?;
        Ok(Self {
            reference: reference.to_string(),
            identity,
        })
    }

    /// The reference as supplied by the caller.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The normalized identity used for keying and reverse lookup.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}
