//! Gain-map extraction and validation.
//!
//! The decoder hands back the HDR gain map as an [`AuxiliaryDataInfo`]: a
//! loosely typed description record, the raw pixel bytes, and the asset's
//! own metadata. [`extract_gain_map`] turns that into a [`GainMapRaster`],
//! refusing anything that is not a complete single-channel 8-bit raster.
//!
//! The description record is what the container serialises next to the gain
//! map, so its geometry must always match the pixels. [`GainMapDescriptor`]
//! is the typed view of those three fields.
//!
//! A gain map is useless without its rendering parameters, so an asset whose
//! metadata has neither an hdrgm XMP packet nor an ISO 21496-1 block is
//! rejected rather than given made-up values.

use crate::error::ResizeError;
use crate::metadata::{ISO_21496, ImageMetadata, PropertyValue, XMP};
use crate::types::{PixelFormat, RasterImage};

pub const DESCRIPTOR_WIDTH: &str = "Width";
pub const DESCRIPTOR_HEIGHT: &str = "Height";
pub const DESCRIPTOR_BYTES_PER_ROW: &str = "BytesPerRow";
pub const DESCRIPTOR_PIXEL_FORMAT: &str = "PixelFormat";

/// The auxiliary HDR gain-map asset as a codec reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryDataInfo {
    /// Geometry and layout record (`Width`, `Height`, `BytesPerRow`, `PixelFormat`).
    pub description: Option<ImageMetadata>,
    /// Pixel bytes, `BytesPerRow * Height` long.
    pub data: Option<Vec<u8>>,
    /// Asset-level metadata: the gain map's XMP packet and/or ISO 21496-1 block.
    pub metadata: ImageMetadata,
}

/// Typed geometry of a gain map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainMapDescriptor {
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
}

impl GainMapDescriptor {
    pub fn new(width: u32, height: u32, row_stride: usize) -> Self {
        Self {
            width,
            height,
            row_stride,
        }
    }

    /// Read the geometry fields of a description record.
    ///
    /// Returns `None` unless all three are present, integral, and positive.
    pub fn from_description(description: &ImageMetadata) -> Option<Self> {
        let field = |key: &str| {
            description
                .get(key)
                .and_then(PropertyValue::as_integer)
                .filter(|&v| v > 0)
        };
        Some(Self {
            width: u32::try_from(field(DESCRIPTOR_WIDTH)?).ok()?,
            height: u32::try_from(field(DESCRIPTOR_HEIGHT)?).ok()?,
            row_stride: usize::try_from(field(DESCRIPTOR_BYTES_PER_ROW)?).ok()?,
        })
    }

    /// Overwrite the geometry fields of a description record.
    pub fn write_to(&self, description: &mut ImageMetadata) {
        description.set(DESCRIPTOR_WIDTH, PropertyValue::Integer(self.width as i64));
        description.set(DESCRIPTOR_HEIGHT, PropertyValue::Integer(self.height as i64));
        description.set(
            DESCRIPTOR_BYTES_PER_ROW,
            PropertyValue::Integer(self.row_stride as i64),
        );
    }

    /// Bytes needed to hold `height` rows of `row_stride`.
    pub fn buffer_len(&self) -> usize {
        self.row_stride * self.height as usize
    }
}

/// A validated gain map: L8 raster, no color space.
#[derive(Debug, Clone, PartialEq)]
pub struct GainMapRaster {
    pub raster: RasterImage,
    /// The source description record, kept so unowned fields pass through.
    pub description: ImageMetadata,
    pub metadata: ImageMetadata,
}

impl GainMapRaster {
    pub fn descriptor(&self) -> GainMapDescriptor {
        GainMapDescriptor::new(self.raster.width, self.raster.height, self.raster.row_stride)
    }
}

/// Validate the decoder's auxiliary asset and build a [`GainMapRaster`].
pub fn extract_gain_map(auxiliary: Option<AuxiliaryDataInfo>) -> Result<GainMapRaster, ResizeError> {
    let aux = auxiliary.ok_or(ResizeError::GainMapMissing)?;
    let failed = |msg: &str| ResizeError::GainMapLoadFailed(msg.to_string());

    let description = aux
        .description
        .ok_or_else(|| failed("gain map has no description record"))?;
    let descriptor = GainMapDescriptor::from_description(&description)
        .ok_or_else(|| failed("gain map width, height or row stride is unreadable"))?;

    match description.get(DESCRIPTOR_PIXEL_FORMAT) {
        None => {}
        Some(PropertyValue::Text(name)) if name == PixelFormat::L8.name() => {}
        Some(other) => {
            return Err(ResizeError::GainMapLoadFailed(format!(
                "gain map pixel format {other:?} is not single-channel 8-bit"
            )));
        }
    }

    if descriptor.row_stride < descriptor.width as usize {
        return Err(ResizeError::GainMapLoadFailed(format!(
            "row stride {} is narrower than width {}",
            descriptor.row_stride, descriptor.width
        )));
    }

    if aux.metadata.get(XMP).is_none() && aux.metadata.get(ISO_21496).is_none() {
        return Err(failed(
            "gain map carries no rendering metadata (hdrgm XMP or ISO 21496-1)",
        ));
    }

    let data = aux.data.ok_or_else(|| failed("gain map pixel data is missing"))?;
    if data.len() < descriptor.buffer_len() {
        return Err(ResizeError::GainMapLoadFailed(format!(
            "gain map buffer holds {} bytes, descriptor needs {}",
            data.len(),
            descriptor.buffer_len()
        )));
    }

    Ok(GainMapRaster {
        raster: RasterImage {
            width: descriptor.width,
            height: descriptor.height,
            bits_per_component: 8,
            row_stride: descriptor.row_stride,
            color_space: None,
            pixel_format: PixelFormat::L8,
            data,
        },
        description,
        metadata: aux.metadata,
    })
}
