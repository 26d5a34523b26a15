//! Pure Rust backend built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode primary and gain map (JPEG) | `image::load_from_memory_with_format` |
//! | Locate gain map, EXIF, XMP, ISO, ICC | [`jpeg_container`](super::jpeg_container) over `kamadak-exif` and `ultrahdr-core` |
//! | Resample | `image::DynamicImage::resize_exact` with `Lanczos3` or `CatmullRom` |
//! | Encode JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Commit | `tempfile::NamedTempFile::persist`, one per output |
//!
//! ## Metadata carried through
//!
//! Decoding reports the primary's EXIF, XMP, ISO 21496-1 block and every
//! other APPn segment (IPTC, maker segments, ...) as properties, and the gain
//! map's XMP and ISO block as asset metadata. Encoding writes all of them
//! back. The container directory gets the new gain-map length and EXIF gets
//! the orientation property; everything else is copied byte for byte.
//!
//! HEIC is recognised as an output format but no HEIF codec is compiled in,
//! so both decoding and encoding it report [`BackendError::Unsupported`].

use super::backend::{BackendError, ImageBackend, SourceImage};
use super::jpeg_container::{self, JpegHeader, SecondaryImage};
use super::packer::PackedBuffer;
use super::params::{EncodeParams, OutputFile, Quality, ResampleFilter};
use crate::dispatch::ContainerFormat;
use crate::gainmap::{
    AuxiliaryDataInfo, DESCRIPTOR_BYTES_PER_ROW, DESCRIPTOR_HEIGHT, DESCRIPTOR_PIXEL_FORMAT,
    DESCRIPTOR_WIDTH, GainMapDescriptor,
};
use crate::metadata::{
    COLOR_MODEL, EXIF, ISO_21496, ImageMetadata, LOSSY_COMPRESSION_QUALITY, ORIENTATION,
    PropertyValue, XMP, app_segment_key, parse_app_segment_key,
};
use crate::types::{ColorSpace, PixelFormat, RasterImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend {
    filter: ResampleFilter,
}

impl RustBackend {
    pub fn new() -> Self {
        Self::with_filter(ResampleFilter::default())
    }

    pub fn with_filter(filter: ResampleFilter) -> Self {
        Self { filter }
    }

    fn filter_type(&self) -> FilterType {
        match self.filter {
            ResampleFilter::Lanczos3 => FilterType::Lanczos3,
            ResampleFilter::CatmullRom => FilterType::CatmullRom,
        }
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_heic(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("heic"))
}

fn decode_jpeg(bytes: &[u8], what: &str) -> Result<DynamicImage, BackendError> {
    image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| BackendError::ProcessingFailed(format!("Failed to decode {what}: {e}")))
}

/// Convert a decoded image into an owned raster, keeping L8 and RGBA as-is.
fn to_raster(img: DynamicImage, color_space: Option<ColorSpace>) -> RasterImage {
    let (width, height) = (img.width(), img.height());
    match img {
        DynamicImage::ImageLuma8(buf) => {
            RasterImage::from_tight(width, height, PixelFormat::L8, color_space, buf.into_raw())
        }
        DynamicImage::ImageRgba8(buf) => {
            RasterImage::from_tight(width, height, PixelFormat::Rgba8, color_space, buf.into_raw())
        }
        other => RasterImage::from_tight(
            width,
            height,
            PixelFormat::Rgb8,
            color_space,
            other.to_rgb8().into_raw(),
        ),
    }
}

fn to_dynamic(raster: &RasterImage) -> Result<DynamicImage, BackendError> {
    let tight = raster.to_tight().ok_or_else(|| {
        BackendError::ProcessingFailed("Raster buffer is shorter than its geometry".into())
    })?;
    let (w, h) = (raster.width, raster.height);
    let img = match raster.pixel_format {
        PixelFormat::L8 => image::GrayImage::from_raw(w, h, tight).map(DynamicImage::ImageLuma8),
        PixelFormat::Rgb8 => image::RgbImage::from_raw(w, h, tight).map(DynamicImage::ImageRgb8),
        PixelFormat::Rgba8 => {
            image::RgbaImage::from_raw(w, h, tight).map(DynamicImage::ImageRgba8)
        }
    };
    img.ok_or_else(|| BackendError::ProcessingFailed("Failed to wrap raster buffer".into()))
}

/// Encode a raster as a baseline JPEG. Alpha is dropped.
fn encode_jpeg(raster: &RasterImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let tight = raster.to_tight().ok_or_else(|| {
        BackendError::ProcessingFailed("Raster buffer is shorter than its geometry".into())
    })?;
    let (data, color) = match raster.pixel_format {
        PixelFormat::L8 => (tight, ExtendedColorType::L8),
        PixelFormat::Rgb8 => (tight, ExtendedColorType::Rgb8),
        PixelFormat::Rgba8 => (
            tight
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            ExtendedColorType::Rgb8,
        ),
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.value())
        .write_image(&data, raster.width, raster.height, color)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {e}")))?;
    Ok(out)
}

/// Write `bytes` to a temp file beside `path`. Dropping it removes it.
fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile, BackendError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    Ok(tmp)
}

fn utf8<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str, BackendError> {
    std::str::from_utf8(bytes)
        .map_err(|e| BackendError::ProcessingFailed(format!("{what} is not UTF-8: {e}")))
}

/// Primary-image properties in codec order: color model, orientation, then
/// the raw segments.
fn primary_properties(primary: &RasterImage, header: JpegHeader) -> ImageMetadata {
    let color_model = match primary.pixel_format {
        PixelFormat::L8 => "Gray",
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => "RGB",
    };
    let orientation = header
        .exif
        .as_deref()
        .and_then(jpeg_container::read_orientation)
        .unwrap_or(1);

    let mut props = ImageMetadata::new();
    props.set(COLOR_MODEL, PropertyValue::Text(color_model.into()));
    props.set(ORIENTATION, PropertyValue::Integer(orientation as i64));
    if let Some(exif) = header.exif {
        props.set(EXIF, PropertyValue::Bytes(exif));
    }
    if let Some(xmp) = header.xmp {
        props.set(XMP, PropertyValue::Bytes(xmp));
    }
    if let Some(iso) = header.iso {
        props.set(ISO_21496, PropertyValue::Bytes(iso));
    }
    for (ordinal, segment) in header.other_segments.into_iter().enumerate() {
        props.set(
            app_segment_key(segment.marker, ordinal),
            PropertyValue::Bytes(segment.payload),
        );
    }
    props
}

/// Turn the secondary image picked as gain map into an auxiliary asset.
///
/// Only rendering parameters become asset metadata. Pixels that fail to
/// decode leave the description and data empty.
fn gain_map_asset(image: SecondaryImage<'_>) -> AuxiliaryDataInfo {
    let mut metadata = ImageMetadata::new();
    if let Some(header) = image.header {
        if header.xmp_str().is_some_and(jpeg_container::is_gain_map_xmp) {
            if let Some(xmp) = header.xmp {
                metadata.set(XMP, PropertyValue::Bytes(xmp));
            }
        }
        if let Some(iso) = header.iso.filter(|b| jpeg_container::is_gain_map_iso(b)) {
            metadata.set(ISO_21496, PropertyValue::Bytes(iso));
        }
    }

    let raster = match decode_jpeg(image.data, "gain map") {
        Ok(img) => to_raster(img, None),
        Err(e) => {
            warn!("{e}");
            return AuxiliaryDataInfo {
                description: None,
                data: None,
                metadata,
            };
        }
    };

    let description: ImageMetadata = [
        (DESCRIPTOR_WIDTH, PropertyValue::Integer(raster.width as i64)),
        (DESCRIPTOR_HEIGHT, PropertyValue::Integer(raster.height as i64)),
        (
            DESCRIPTOR_BYTES_PER_ROW,
            PropertyValue::Integer(raster.row_stride as i64),
        ),
        (
            DESCRIPTOR_PIXEL_FORMAT,
            PropertyValue::Text(raster.pixel_format.name().into()),
        ),
    ]
    .into_iter()
    .collect();

    AuxiliaryDataInfo {
        description: Some(description),
        data: Some(raster.data),
        metadata,
    }
}

/// EXIF payload for the output: the source TIFF with orientation synced, or
/// a minimal one when the source had none and the image is rotated.
fn output_exif(properties: &ImageMetadata) -> Result<Option<Vec<u8>>, BackendError> {
    let orientation = properties
        .get(ORIENTATION)
        .and_then(PropertyValue::as_integer)
        .and_then(|v| u16::try_from(v).ok())
        .filter(|v| (1..=8).contains(v));

    match properties.get(EXIF).and_then(PropertyValue::as_bytes) {
        Some(tiff) => {
            let mut tiff = tiff.to_vec();
            if let Some(o) = orientation {
                if !jpeg_container::set_orientation(&mut tiff, o) {
                    debug!("Source EXIF has no orientation tag; leaving it unchanged");
                }
            }
            Ok(Some(tiff))
        }
        None => orientation
            .filter(|&o| o != 1)
            .map(jpeg_container::minimal_exif)
            .transpose(),
    }
}

/// Segments for the primary image, in file order.
fn primary_segments(
    properties: &ImageMetadata,
    primary: &RasterImage,
    gain_map_len: usize,
) -> Result<Vec<Vec<u8>>, BackendError> {
    let mut segments = Vec::new();
    if let Some(exif) = output_exif(properties)? {
        segments.push(jpeg_container::exif_segment(&exif)?);
    }

    // A source packet without a GainMap item is kept as-is: the MPF index
    // and the gain map's own metadata still identify the gain map.
    let xmp = match properties.get(XMP).and_then(PropertyValue::as_bytes) {
        Some(source) => {
            let source = utf8(source, "Primary XMP")?;
            jpeg_container::with_gain_map_length(source, gain_map_len)
                .unwrap_or_else(|| source.to_string())
        }
        None => jpeg_container::primary_xmp(gain_map_len),
    };
    segments.push(jpeg_container::xmp_segment(&xmp)?);

    if let Some(ColorSpace::Icc(profile)) = &primary.color_space {
        segments.extend(jpeg_container::icc_segments(profile)?);
    }
    if let Some(iso) = properties.get(ISO_21496).and_then(PropertyValue::as_bytes) {
        segments.push(jpeg_container::iso_segment(iso)?);
    }
    for (key, value) in properties.iter() {
        if let (Some(marker), Some(payload)) = (parse_app_segment_key(key), value.as_bytes()) {
            segments.push(jpeg_container::opaque_segment(marker, payload)?);
        }
    }
    Ok(segments)
}

impl ImageBackend for RustBackend {
    fn decode(&self, path: &Path) -> Result<SourceImage, BackendError> {
        if is_heic(path) {
            return Err(BackendError::Unsupported(format!(
                "HEIC decoding is not available: {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        let header = jpeg_container::read_header(&bytes)?;
        let primary_bytes = jpeg_container::primary_image(&bytes, &header);
        let secondaries = jpeg_container::secondary_images(&bytes, &header)?;
        let secondary_count = secondaries.len();
        let gain_map = jpeg_container::find_gain_map(&header, secondaries);

        let color_space = match &header.icc {
            Some(icc) => ColorSpace::Icc(icc.clone()),
            None => ColorSpace::Srgb,
        };
        let primary = to_raster(decode_jpeg(primary_bytes, "primary image")?, Some(color_space));
        let metadata = primary_properties(&primary, header);
        let auxiliary = gain_map.map(gain_map_asset);

        debug!(
            "Decoded {} ({}x{}, {} secondary image(s), gain map: {})",
            path.display(),
            primary.width,
            primary.height,
            secondary_count,
            if auxiliary.is_some() { "yes" } else { "no" }
        );
        Ok(SourceImage {
            primary,
            metadata,
            auxiliary,
        })
    }

    fn resample(
        &self,
        raster: &RasterImage,
        width: u32,
        height: u32,
    ) -> Result<RasterImage, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::ProcessingFailed(format!(
                "Cannot resample {}x{} to {width}x{height}",
                raster.width, raster.height
            )));
        }
        if raster.color_space.is_none() && raster.pixel_format != PixelFormat::L8 {
            return Err(BackendError::ProcessingFailed(format!(
                "{} raster has no color space",
                raster.pixel_format.name()
            )));
        }
        let resized = to_dynamic(raster)?.resize_exact(width, height, self.filter_type());
        Ok(to_raster(resized, raster.color_space.clone()))
    }

    fn render_into(
        &self,
        raster: &RasterImage,
        target: &mut PackedBuffer,
    ) -> Result<(), BackendError> {
        if (raster.width, raster.height) != (target.width(), target.height())
            || raster.pixel_format.bytes_per_pixel() != target.bytes_per_pixel()
        {
            return Err(BackendError::ProcessingFailed(format!(
                "Cannot render {}x{} {} into a {}x{} buffer of {} bytes per pixel",
                raster.width,
                raster.height,
                raster.pixel_format.name(),
                target.width(),
                target.height(),
                target.bytes_per_pixel()
            )));
        }
        for y in 0..raster.height {
            let src = raster.row(y).ok_or_else(|| {
                BackendError::ProcessingFailed(format!("Raster row {y} is out of bounds"))
            })?;
            let dst = target.row_mut(y).ok_or_else(|| {
                BackendError::ProcessingFailed(format!("Target row {y} is out of bounds"))
            })?;
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    fn encode(&self, params: &EncodeParams<'_>) -> Result<Vec<u8>, BackendError> {
        if params.format == ContainerFormat::Heic {
            return Err(BackendError::Unsupported(
                "HEIC encoding is not available".into(),
            ));
        }

        let quality = params
            .properties
            .get(LOSSY_COMPRESSION_QUALITY)
            .and_then(PropertyValue::as_float)
            .map(Quality::from_fraction)
            .unwrap_or_default();

        let asset = &params.gain_map;
        let gain_map_xmp = asset.metadata.get(XMP).and_then(PropertyValue::as_bytes);
        let gain_map_iso = asset
            .metadata
            .get(ISO_21496)
            .and_then(PropertyValue::as_bytes);
        if gain_map_xmp.is_none() && gain_map_iso.is_none() {
            return Err(BackendError::ProcessingFailed(
                "Gain map has no rendering metadata to write".into(),
            ));
        }

        // Gain map first: the primary's XMP records its encoded length.
        let descriptor = GainMapDescriptor::from_description(asset.description).ok_or_else(|| {
            BackendError::ProcessingFailed("Gain-map description has no geometry".into())
        })?;
        let gain_map = RasterImage {
            width: descriptor.width,
            height: descriptor.height,
            bits_per_component: 8,
            row_stride: descriptor.row_stride,
            color_space: None,
            pixel_format: PixelFormat::L8,
            data: asset.data.to_vec(),
        };
        let mut gain_map_segments = Vec::new();
        if let Some(xmp) = gain_map_xmp {
            gain_map_segments.push(jpeg_container::xmp_segment(utf8(xmp, "Gain-map XMP")?)?);
        }
        if let Some(iso) = gain_map_iso {
            gain_map_segments.push(jpeg_container::iso_segment(iso)?);
        }
        let gain_map_jpeg = jpeg_container::insert_segments(
            &encode_jpeg(&gain_map, quality)?,
            &gain_map_segments,
        )?;

        let segments = primary_segments(params.properties, params.primary, gain_map_jpeg.len())?;
        let primary_jpeg = encode_jpeg(params.primary, quality)?;
        let out = jpeg_container::assemble(&primary_jpeg, &segments, &gain_map_jpeg)?;
        debug!(
            "Encoded container ({} bytes, gain map {} bytes, quality {})",
            out.len(),
            gain_map_jpeg.len(),
            quality.value()
        );
        Ok(out)
    }

    fn encode_preview(
        &self,
        raster: &RasterImage,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        encode_jpeg(raster, quality)
    }

    /// Stage every file beside its destination, then rename them in order.
    ///
    /// A staging failure leaves every destination untouched. A rename
    /// failure removes the files this commit already renamed.
    fn commit(&self, files: &[OutputFile]) -> Result<(), BackendError> {
        let staged = files
            .iter()
            .map(|f| stage(&f.path, &f.bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let mut persisted: Vec<&Path> = Vec::with_capacity(files.len());
        for (tmp, file) in staged.into_iter().zip(files) {
            if let Err(e) = tmp.persist(&file.path) {
                for path in &persisted {
                    if let Err(err) = std::fs::remove_file(path) {
                        warn!("Cannot remove {} after failed commit: {err}", path.display());
                    }
                }
                return Err(BackendError::Io(e.error));
            }
            debug!("Wrote {}", file.path.display());
            persisted.push(&file.path);
        }
        Ok(())
    }
}
