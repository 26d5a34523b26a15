//! High-level image operations.
//!
//! These functions combine calculations with backend execution. They decide
//! target sizes, call the backend, and map its failures onto the resize
//! error taxonomy: resampling is `ResizeFailed`, rendering into the packed
//! buffer is `EncodingFailed`.

use super::backend::ImageBackend;
use super::calculations::gain_map_dimensions;
use super::packer::PackedBuffer;
use crate::error::ResizeError;
use crate::size::ResolvedSize;
use crate::types::RasterImage;
use tracing::debug;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ResizeError>;

/// Resample the primary raster to the resolved output size.
pub fn resample_primary(
    backend: &impl ImageBackend,
    primary: &RasterImage,
    target: ResolvedSize,
) -> Result<RasterImage> {
    debug!(
        from_width = primary.width,
        from_height = primary.height,
        to_width = target.width,
        to_height = target.height,
        "Resampling primary image"
    );
    backend
        .resample(primary, target.width, target.height)
        .map_err(|e| ResizeError::ResizeFailed(format!("primary image: {e}")))
}

/// Resample the gain map to half the resized primary and pack it.
///
/// The target is always `(main_width / 2, main_height / 2)`, whatever the
/// source gain map's resolution was. No orientation is applied: the gain map
/// stays on the primary's unrotated pixel grid.
pub fn regenerate_gain_map(
    backend: &impl ImageBackend,
    gain_map: &RasterImage,
    main_width: u32,
    main_height: u32,
) -> Result<PackedBuffer> {
    let (width, height) = gain_map_dimensions(main_width, main_height);
    debug!(
        from_width = gain_map.width,
        from_height = gain_map.height,
        to_width = width,
        to_height = height,
        "Resampling gain map"
    );
    let resized = backend
        .resample(gain_map, width, height)
        .map_err(|e| ResizeError::ResizeFailed(format!("gain map: {e}")))?;

    let mut packed = PackedBuffer::l8(width, height);
    backend
        .render_into(&resized, &mut packed)
        .map_err(|e| ResizeError::EncodingFailed(e.to_string()))?;
    debug!(
        row_stride = packed.row_stride(),
        bytes = packed.len(),
        "Packed gain map"
    );
    Ok(packed)
}
