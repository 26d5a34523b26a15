//! Parameter types for backend operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the pipeline (which decides what to produce) and the
//! [`backend`](super::backend) (which does the pixel and container work).
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 85). Validated on construction.
//! - [`ResampleFilter`]: interpolation kernel; only high-quality kernels exist.
//! - [`EncodeParams`]: everything the encoder needs for one output container.
//! - [`OutputFile`]: encoded bytes and their destination, committed together.

use crate::dispatch::ContainerFormat;
use crate::error::ResizeError;
use crate::metadata::ImageMetadata;
use crate::types::RasterImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 100;

    pub fn new(value: i64) -> Result<Self, ResizeError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ResizeError::InvalidQuality(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Quality as the fraction codecs expect, e.g. `85` → `0.85`.
    pub fn fraction(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Inverse of [`fraction`](Self::fraction), clamped into range.
    pub fn from_fraction(fraction: f64) -> Self {
        Self((fraction * 100.0).round().clamp(1.0, 100.0) as u8)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Resampling kernel.
///
/// Nearest-neighbour and bilinear are deliberately absent: gain maps
/// resampled with them show visible blocking once the HDR boost is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleFilter {
    #[default]
    Lanczos3,
    CatmullRom,
}

/// The gain-map asset attached to an output container.
#[derive(Debug, Clone, Copy)]
pub struct GainMapAsset<'a> {
    /// Description record (`Width`, `Height`, `BytesPerRow`, ...).
    pub description: &'a ImageMetadata,
    /// Row-aligned L8 pixels, `BytesPerRow * Height` bytes.
    pub data: &'a [u8],
    /// Asset-level metadata (hdrgm XMP, ISO 21496-1) carried from the source.
    pub metadata: &'a ImageMetadata,
}

/// Parameters for encoding one output container.
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams<'a> {
    pub format: ContainerFormat,
    pub primary: &'a RasterImage,
    /// Primary-image properties, including `LossyCompressionQuality`.
    pub properties: &'a ImageMetadata,
    pub gain_map: GainMapAsset<'a>,
}

/// An encoded file waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}
