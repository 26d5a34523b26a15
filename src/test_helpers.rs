//! Shared test fixtures for the hdr-resize test suite.
//!
//! Builders for decoded sources and gain-map assets in the shape the codec
//! backend reports them, so pipeline tests can run against `MockBackend`
//! without real image files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let backend = MockBackend::with_source(source_image(4000, 3000, 1000, 750));
//! let aux = gain_map_aux(101, 3, 104);
//! ```

use crate::gainmap::{AuxiliaryDataInfo, DESCRIPTOR_PIXEL_FORMAT, GainMapDescriptor};
use crate::imaging::SourceImage;
use crate::metadata::{COLOR_MODEL, ImageMetadata, ORIENTATION, PropertyValue, XMP};
use crate::types::{ColorSpace, PixelFormat, RasterImage};

// =========================================================================
// Gain-map assets
// =========================================================================

/// Gain-map XMP with hdrgm rendering parameters and no container directory.
pub const GAIN_MAP_XMP: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:hdrgm="http://ns.adobe.com/hdr-gain-map/1.0/"
        hdrgm:Version="1.0"
        hdrgm:GainMapMin="0.25"
        hdrgm:GainMapMax="3.5"
        hdrgm:Gamma="1.2"
        hdrgm:OffsetSDR="0.015625"
        hdrgm:OffsetHDR="0.015625"
        hdrgm:HDRCapacityMin="0"
        hdrgm:HDRCapacityMax="3.5"
        hdrgm:BaseRenditionIsHDR="False"/>
  </rdf:RDF>
</x:xmpmeta>"#;

/// An L8 gain-map asset with a full description record, [`GAIN_MAP_XMP`]
/// and a buffer of exactly `stride * height` bytes.
pub fn gain_map_aux(width: u32, height: u32, stride: usize) -> AuxiliaryDataInfo {
    let mut description = ImageMetadata::new();
    GainMapDescriptor::new(width, height, stride).write_to(&mut description);
    description.set(
        DESCRIPTOR_PIXEL_FORMAT,
        PropertyValue::Text(PixelFormat::L8.name().into()),
    );
    AuxiliaryDataInfo {
        description: Some(description),
        data: Some(vec![0u8; stride * height as usize]),
        metadata: [(XMP, PropertyValue::Bytes(GAIN_MAP_XMP.as_bytes().to_vec()))]
            .into_iter()
            .collect(),
    }
}

// =========================================================================
// Decoded sources
// =========================================================================

/// An unrotated RGB source with a tightly packed gain map.
///
/// The primary buffer is left empty: the mock backend never reads pixels.
pub fn source_image(width: u32, height: u32, gm_width: u32, gm_height: u32) -> SourceImage {
    rotated_source_image(width, height, gm_width, gm_height, 1)
}

/// Like [`source_image`] with an EXIF orientation property.
pub fn rotated_source_image(
    width: u32,
    height: u32,
    gm_width: u32,
    gm_height: u32,
    orientation: i64,
) -> SourceImage {
    let primary = RasterImage {
        width,
        height,
        bits_per_component: 8,
        row_stride: width as usize * 3,
        color_space: Some(ColorSpace::Srgb),
        pixel_format: PixelFormat::Rgb8,
        data: Vec::new(),
    };
    let metadata: ImageMetadata = [
        (COLOR_MODEL, PropertyValue::Text("RGB".into())),
        (ORIENTATION, PropertyValue::Integer(orientation)),
    ]
    .into_iter()
    .collect();
    SourceImage {
        primary,
        metadata,
        auxiliary: Some(gain_map_aux(gm_width, gm_height, gm_width as usize)),
    }
}
