//! Image properties and their reconciliation for output.
//!
//! Codecs describe an image with an ordered set of named properties
//! (orientation, color model, raw EXIF, ...). The pipeline treats that set as
//! opaque and passes it through, with exactly two exceptions it owns:
//!
//! - **Compression quality**: [`LOSSY_COMPRESSION_QUALITY`] is set to the
//!   requested quality as a fraction (`85` → `0.85`).
//! - **Gain-map descriptor**: the `Width`, `Height` and `BytesPerRow` fields of
//!   the auxiliary asset's description are rewritten to match the regenerated
//!   gain map, because the codec serialises that record next to the pixels.
//!
//! Everything else keeps its value and its position. Replacing a key that
//! already exists updates it in place; new keys are appended.

use crate::gainmap::GainMapDescriptor;
use crate::imaging::Quality;

/// Primary-image property: EXIF orientation tag value (1-8).
pub const ORIENTATION: &str = "Orientation";
/// Primary-image property: `"RGB"` or `"Gray"`.
pub const COLOR_MODEL: &str = "ColorModel";
/// Primary-image property: raw EXIF TIFF structure.
pub const EXIF: &str = "{Exif}";
/// Raw XMP packet. On the primary it holds the container directory; on the
/// gain-map asset it holds the hdrgm rendering parameters.
pub const XMP: &str = "{XMP}";
/// Raw ISO 21496-1 block, identifier stripped. The gain map's copy carries
/// the rendering parameters; the primary's is usually version-only.
pub const ISO_21496: &str = "{ISO21496-1}";
/// Encoder property: lossy quality as a fraction in `(0, 1]`.
pub const LOSSY_COMPRESSION_QUALITY: &str = "LossyCompressionQuality";

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Property key for an opaque APPn segment carried from the source, e.g.
/// `{APP13:0}`. The ordinal keeps repeated segments apart and in order.
pub fn app_segment_key(marker: u8, ordinal: usize) -> String {
    format!("{{APP{}:{ordinal}}}", marker.wrapping_sub(0xE0))
}

/// JPEG marker byte named by an [`app_segment_key`].
pub fn parse_app_segment_key(key: &str) -> Option<u8> {
    let (number, ordinal) = key.strip_prefix("{APP")?.strip_suffix('}')?.split_once(':')?;
    ordinal.parse::<usize>().ok()?;
    let number: u8 = number.parse().ok()?;
    (number <= 15).then_some(0xE0 + number)
}

/// Insertion-ordered property map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    entries: Vec<(String, PropertyValue)>,
}

impl ImageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set `key`, keeping its position if it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, PropertyValue)> for ImageMetadata {
    fn from_iter<I: IntoIterator<Item = (K, PropertyValue)>>(iter: I) -> Self {
        let mut md = Self::new();
        for (k, v) in iter {
            md.set(k, v);
        }
        md
    }
}

/// Properties handed to the encoder for one output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledMetadata {
    /// Primary-image properties, including the compression quality.
    pub properties: ImageMetadata,
    /// Gain-map description with the regenerated geometry.
    pub gain_map_description: ImageMetadata,
}

/// Build output metadata from the source's properties.
///
/// Both maps are shallow copies of their inputs; only the quality property
/// and the descriptor geometry differ.
pub fn reconcile(
    original: &ImageMetadata,
    quality: Quality,
    gain_map_description: &ImageMetadata,
    descriptor: GainMapDescriptor,
) -> ReconciledMetadata {
    let mut properties = original.clone();
    properties.set(
        LOSSY_COMPRESSION_QUALITY,
        PropertyValue::Float(quality.fraction()),
    );

    let mut description = gain_map_description.clone();
    descriptor.write_to(&mut description);

    ReconciledMetadata {
        properties,
        gain_map_description: description,
    }
}
