//! Codec and resampler backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the boundary between the resize pipeline and
//! everything that touches pixels, container bytes or the filesystem. The
//! pipeline only coordinates sizes, strides and metadata; it never decodes
//! or filters anything itself.
//!
//! Output is two-phase: `encode` and `encode_preview` produce bytes in
//! memory, then a single `commit` writes every file of the run. Nothing
//! reaches the disk unless every output encoded.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate.

use super::packer::PackedBuffer;
use super::params::{EncodeParams, OutputFile, Quality};
use crate::gainmap::AuxiliaryDataInfo;
use crate::metadata::ImageMetadata;
use crate::types::RasterImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// A decoded source file: primary raster, its properties, and the HDR
/// gain-map asset if the container carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub primary: RasterImage,
    pub metadata: ImageMetadata,
    pub auxiliary: Option<AuxiliaryDataInfo>,
}

/// Trait for codec/resampler backends.
///
/// Every backend implements all six operations so the pipeline is
/// backend-agnostic and testable with a recording mock.
pub trait ImageBackend {
    /// Decode the primary image, its properties, and the gain-map asset.
    fn decode(&self, path: &Path) -> Result<SourceImage, BackendError>;

    /// Resample `raster` to exactly `width` x `height` with a high-quality kernel.
    fn resample(
        &self,
        raster: &RasterImage,
        width: u32,
        height: u32,
    ) -> Result<RasterImage, BackendError>;

    /// Render `raster` into `target` row by row, honouring its stride.
    fn render_into(&self, raster: &RasterImage, target: &mut PackedBuffer)
    -> Result<(), BackendError>;

    /// Encode the primary image plus its gain-map asset as one container.
    fn encode(&self, params: &EncodeParams<'_>) -> Result<Vec<u8>, BackendError>;

    /// Encode a raster on its own as a plain JPEG (no auxiliary asset).
    fn encode_preview(&self, raster: &RasterImage, quality: Quality)
    -> Result<Vec<u8>, BackendError>;

    /// Write all `files`, or leave every destination as it was.
    fn commit(&self, files: &[OutputFile]) -> Result<(), BackendError>;
}
