use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::format::FormatPolicy;

/// Cache behavior configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Namespace prefix for index keys. Default: "thumbcache".
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Directory, relative to the blob store root, that derived artifacts
    /// are stored under. Default: "cache".
    #[serde(default = "default_cache_root")]
    pub cache_root: String,
    /// Global output format override. Default: none.
    #[serde(default)]
    pub format_override: Option<String>,
    /// Keep the source's own format when its extension is recognized.
    /// Default: false.
    #[serde(default)]
    pub preserve_format: bool,
    /// Format token used when nothing else matches. Default: "JPEG".
    #[serde(default = "default_fallback_format")]
    pub fallback_format: String,
    /// Encode quality applied when a request does not specify one.
    /// Default: 95.
    #[serde(default = "default_quality")]
    pub default_quality: u8,
    /// Salt cache keys with the source byte size, so a changed source
    /// stops matching its old thumbnails without an explicit delete.
    /// Default: false.
    #[serde(default)]
    pub fingerprint_sources: bool,
}

fn default_key_prefix() -> String {
    "thumbcache".into()
}
fn default_cache_root() -> String {
    "cache".into()
}
fn default_fallback_format() -> String {
    "JPEG".into()
}
fn default_quality() -> u8 {
    95
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            cache_root: default_cache_root(),
            format_override: None,
            preserve_format: false,
            fallback_format: default_fallback_format(),
            default_quality: default_quality(),
            fingerprint_sources: false,
        }
    }
}

impl CacheConfig {
    /// Load configuration from an optional file plus environment variables.
    ///
    /// The file path comes from `THUMBCACHE_CONFIG` (default
    /// `config/config`); environment variables use the `THUMBCACHE` prefix
    /// with `__` separators, e.g. `THUMBCACHE__PRESERVE_FORMAT=true`.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("THUMBCACHE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("THUMBCACHE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// The format-resolution slice of this configuration.
    pub fn format_policy(&self) -> FormatPolicy {
        FormatPolicy {
            override_format: self.format_override.clone(),
            preserve_format: self.preserve_format,
            fallback: self.fallback_format.clone(),
        }
    }
}
