//! One resize run, start to finish.
//!
//! ```text
//! parse size ─► check output (and preview) paths ─► decode ─► extract gain map
//!     ─► resolve size ─► resample primary ─► resample + pack gain map
//!     ─► reconcile metadata ─► encode container (+ preview) ─► commit
//! ```
//!
//! Everything cheap to validate (size expression, output and preview
//! paths) is checked before the input file is opened. Each stage owns the
//! raster it produces and drops its input when it returns. Output files are
//! encoded in memory and committed together, so a failure at any stage
//! leaves no file behind.

use crate::dispatch::{self, ContainerFormat};
use crate::error::ResizeError;
use crate::gainmap::{self, GainMapDescriptor};
use crate::imaging::{ImageBackend, Quality, regenerate_gain_map, resample_primary};
use crate::metadata;
use crate::size;
use std::path::PathBuf;
use tracing::{debug, info};

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct ResizeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Size expression: `WxH`, `Wx` or `xH`.
    pub size: String,
    pub quality: Quality,
    /// Also write the regenerated gain map here as a grayscale JPEG. Must be
    /// a `.jpg`/`.jpeg` path other than `output`.
    pub gain_map_preview: Option<PathBuf>,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source_size: (u32, u32),
    pub source_gain_map_size: (u32, u32),
    pub output_size: (u32, u32),
    pub gain_map: GainMapDescriptor,
    pub quality: Quality,
    pub format: ContainerFormat,
    pub gain_map_preview: Option<PathBuf>,
}

/// Resize `request.input` into `request.output`.
pub fn resize_image(
    backend: &impl ImageBackend,
    request: &ResizeRequest,
) -> Result<ResizeReport, ResizeError> {
    let directive = size::parse(&request.size)?;
    dispatch::container_format(&request.output)?;
    if let Some(preview) = &request.gain_map_preview {
        dispatch::check_preview_path(preview, &request.output)?;
    }

    let source = backend.decode(&request.input).map_err(|e| {
        ResizeError::ImageLoadFailed(format!("{}: {e}", request.input.display()))
    })?;
    info!(
        path = %request.input.display(),
        width = source.primary.width,
        height = source.primary.height,
        "Decoded source"
    );

    let gain_map = gainmap::extract_gain_map(source.auxiliary)?;
    let source_size = (source.primary.width, source.primary.height);
    let source_gain_map_size = (gain_map.raster.width, gain_map.raster.height);
    debug!(
        width = gain_map.raster.width,
        height = gain_map.raster.height,
        row_stride = gain_map.raster.row_stride,
        "Source gain map"
    );

    let target = size::resolve(directive, source_size.0, source_size.1);
    let main = resample_primary(backend, &source.primary, target)?;
    drop(source.primary);

    let packed = regenerate_gain_map(backend, &gain_map.raster, main.width, main.height)?;
    let descriptor = packed.descriptor();
    info!(
        width = main.width,
        height = main.height,
        gain_map_width = descriptor.width,
        gain_map_height = descriptor.height,
        row_stride = descriptor.row_stride,
        "Resampled"
    );

    let reconciled = metadata::reconcile(
        &source.metadata,
        request.quality,
        &gain_map.description,
        descriptor,
    );

    let (format, container) = dispatch::encode_container(
        backend,
        &main,
        descriptor,
        packed.as_bytes(),
        &reconciled,
        &gain_map.metadata,
        &request.output,
    )?;
    let mut files = vec![container];
    if let Some(preview) = &request.gain_map_preview {
        files.push(dispatch::encode_preview(
            backend,
            &packed,
            request.quality,
            preview,
        )?);
    }
    dispatch::commit(backend, &files)?;

    Ok(ResizeReport {
        input: request.input.clone(),
        output: request.output.clone(),
        source_size,
        source_gain_map_size,
        output_size: (main.width, main.height),
        gain_map: descriptor,
        quality: request.quality,
        format,
        gain_map_preview: request.gain_map_preview.clone(),
    })
}
