use unicode_normalization::{UnicodeNormalization, is_nfc};
use url::Url;

use crate::error::CacheError;

/// Derive the stable identity string for a source reference.
///
/// Identities are NFC-normalized so visually identical references hash to
/// the same cache key regardless of how the caller's platform composed
/// them; the result does not depend on process locale. Remote URLs are
/// accepted verbatim apart from normalization; local references must be
/// relative and free of traversal segments.
pub fn resolve_identity(reference: &str) -> Result<String, CacheError> {
    if reference.trim().is_empty() {
        return Err(CacheError::InvalidReference("empty reference".into()));
    }
    if reference.contains('\0') {
        return Err(CacheError::InvalidReference(
            "reference contains NUL".into(),
        ));
    }

    let normalized: String = if is_nfc(reference) {
        reference.to_string()
    } else {
        reference.nfc().collect()
    };

    if is_remote(&normalized) {
        return Ok(normalized);
    }

    if normalized.starts_with('/') {
        return Err(CacheError::InvalidReference(format!(
            "absolute path: {normalized}"
        )));
    }
    if normalized
        .split(['/', '\\'])
        .any(|segment| segment == "..")
    {
        return Err(CacheError::InvalidReference(format!(
            "path traversal: {normalized}"
        )));
    }

    Ok(normalized)
}

/// Whether a reference is a remote URL rather than a storage-relative name.
pub(crate) fn is_remote(reference: &str) -> bool {
    match Url::parse(reference) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}
