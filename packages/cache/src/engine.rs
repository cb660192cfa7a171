use async_trait::async_trait;
use thiserror::Error;

use crate::options::TransformOptions;

/// Errors surfaced by an encode engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a decodable image: {0}")]
    InvalidImage(String),

    #[error("unsupported transform: {0}")]
    Unsupported(String),
}

/// Pixel dimensions reported by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// A fully encoded derived image.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Pixel-level decode/resize/encode backend.
///
/// The cache core never touches pixels itself; implementations wrap an
/// imaging library and are injected at construction time.
#[async_trait]
pub trait EncodeEngine: Send + Sync {
    /// Decode enough of `bytes` to report the source dimensions.
    async fn probe(&self, bytes: &[u8]) -> Result<ImageInfo, EngineError>;

    /// Whether `bytes` decode as an image.
    ///
    /// Never fails; malformed input returns `false`.
    fn is_valid_image(&self, bytes: &[u8]) -> bool;

    /// Produce the encoded derived image described by `options`.
    async fn transform(
        &self,
        bytes: &[u8],
        options: &TransformOptions,
    ) -> Result<EncodedImage, EngineError>;
}
