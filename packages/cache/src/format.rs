use percent_encoding::percent_decode_str;
use url::Url;

/// Output encodings the cache knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
}

impl ImageFormat {
    /// Case-insensitive extension lookup.
    ///
    /// The table is ASCII-only; non-ASCII extension candidates simply fail
    /// the lookup.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::Webp),
            "avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// Parse a canonical format token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "JPEG" => Some(ImageFormat::Jpeg),
            "PNG" => Some(ImageFormat::Png),
            "GIF" => Some(ImageFormat::Gif),
            "WEBP" => Some(ImageFormat::Webp),
            "AVIF" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// Canonical format token, as stored in options and cache keys.
    pub fn token(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Png => "PNG",
            ImageFormat::Gif => "GIF",
            ImageFormat::Webp => "WEBP",
            ImageFormat::Avif => "AVIF",
        }
    }

    /// Primary file extension for stored artifacts.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }
}

/// File extension for a format token, including tokens the cache does not
/// recognize (a configured fallback may be anything).
pub fn extension_for_token(token: &str) -> String {
    match ImageFormat::from_token(token) {
        Some(format) => format.extension().to_string(),
        None => token.to_ascii_lowercase(),
    }
}

/// Decides the output format token for a request.
///
/// Resolution never fails: an unmatched extension falls back to the
/// configured default even when that default is not a recognized format.
/// Serving a possibly-wrong format beats refusing to serve anything.
#[derive(Debug, Clone)]
pub struct FormatPolicy {
    /// Global output format, applied unless `preserve_format` is set.
    pub override_format: Option<String>,
    /// Keep the source's own format when its extension is recognized.
    pub preserve_format: bool,
    /// Token returned when nothing else matches. Opaque; the caller owns
    /// the consequences of configuring an unsupported one.
    pub fallback: String,
}

impl FormatPolicy {
    pub fn resolve(&self, file_name_or_url: &str) -> String {
        if let (Some(override_format), false) = (&self.override_format, self.preserve_format) {
            return override_format.clone();
        }
        if let Some(format) =
            last_extension(file_name_or_url).and_then(|ext| ImageFormat::from_extension(&ext))
        {
            return format.token().to_string();
        }
        self.fallback.clone()
    }
}

/// Last dot-delimited extension segment of a file name, or of a URL's path
/// component with query and fragment stripped and percent-escapes decoded.
fn last_extension(file_name_or_url: &str) -> Option<String> {
    let name = match Url::parse(file_name_or_url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            percent_decode_str(parsed.path())
                .decode_utf8_lossy()
                .into_owned()
        }
        _ => file_name_or_url.to_string(),
    };

    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_string())
}
