use std::collections::BTreeMap;
use std::fmt;

use crate::error::CacheError;

/// Requested output geometry, parsed from `"WxH"`, `"W"`, or `"xH"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Geometry {
    pub fn parse(s: &str) -> Result<Self, CacheError> {
        let bad = || CacheError::InvalidOptions(format!("bad geometry: {s:?}"));
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(bad());
        }
        let (w, h) = match trimmed.split_once('x') {
            Some((w, h)) => (w, h),
            None => (trimmed, ""),
        };
        let width = if w.is_empty() {
            None
        } else {
            Some(w.parse::<u32>().map_err(|_| bad())?)
        };
        let height = if h.is_empty() {
            None
        } else {
            Some(h.parse::<u32>().map_err(|_| bad())?)
        };
        if width.is_none() && height.is_none() {
            return Err(bad());
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.width, self.height) {
            (Some(w), Some(h)) => write!(f, "{w}x{h}"),
            (Some(w), None) => write!(f, "{w}"),
            (None, Some(h)) => write!(f, "x{h}"),
            (None, None) => Ok(()),
        }
    }
}

/// How to crop when the requested aspect ratio differs from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropMode {
    Center,
    Smart,
    /// Percentage offsets from the left and top edges.
    Percent(u8, u8),
}

impl CropMode {
    fn canonical(&self) -> String {
        match self {
            CropMode::Center => "center".into(),
            CropMode::Smart => "smart".into(),
            CropMode::Percent(x, y) => format!("{x}% {y}%"),
        }
    }
}

/// Backend-specific option value.
///
/// Only scalars, so every value has exactly one rendering independent of
/// locale or insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ExtraValue {
    fn canonical(&self) -> String {
        match self {
            ExtraValue::Str(s) => s.clone(),
            ExtraValue::Int(i) => i.to_string(),
            ExtraValue::Float(x) => x.to_string(),
            ExtraValue::Bool(b) => b.to_string(),
        }
    }
}

/// The full derivation request for one thumbnail.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub geometry: Geometry,
    pub crop: Option<CropMode>,
    pub quality: Option<u8>,
    /// Resolved output format token. Filled in by the format policy before
    /// key building; `None` only between construction and resolution.
    pub format: Option<String>,
    pub upscale: bool,
    pub extras: BTreeMap<String, ExtraValue>,
}

impl TransformOptions {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            crop: None,
            quality: None,
            format: None,
            upscale: true,
            extras: BTreeMap::new(),
        }
    }

    /// Options for a geometry string with everything else defaulted.
    pub fn parse(geometry: &str) -> Result<Self, CacheError> {
        Ok(Self::new(Geometry::parse(geometry)?))
    }

    pub fn with_crop(mut self, crop: CropMode) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: ExtraValue) -> Self {
        self.extras.insert(name.into(), value);
        self
    }

    /// Canonical byte form used for cache-key hashing.
    ///
    /// Fixed fields and extras merge into one lexicographically ordered
    /// `name=value` sequence. Separator and escape characters inside names
    /// and values are escaped, so no value can masquerade as a field
    /// boundary. Two semantically equal option sets always canonicalize to
    /// the same bytes.
    pub fn canonical(&self) -> String {
        let mut fields: BTreeMap<&str, String> = BTreeMap::new();
        for (name, value) in &self.extras {
            fields.insert(name.as_str(), value.canonical());
        }
        fields.insert("geometry", self.geometry.to_string());
        if let Some(crop) = &self.crop {
            fields.insert("crop", crop.canonical());
        }
        if let Some(quality) = self.quality {
            fields.insert("quality", quality.to_string());
        }
        if let Some(format) = &self.format {
            fields.insert("format", format.clone());
        }
        fields.insert("upscale", self.upscale.to_string());

        let mut out = String::new();
        for (name, value) in &fields {
            if !out.is_empty() {
                out.push(FIELD_SEPARATOR);
            }
            escape_into(&mut out, name);
            out.push('=');
            escape_into(&mut out, value);
        }
        out
    }
}

const FIELD_SEPARATOR: char = '\x1e';

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        if matches!(c, '\\' | '=' | FIELD_SEPARATOR) {
            out.push('\\');
        }
        out.push(c);
    }
}
