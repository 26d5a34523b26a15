//! Output dispatch: pick the container from the output path, hand the
//! primary image plus its gain map to the codec backend, and commit every
//! encoded file of the run in one step.

use crate::error::ResizeError;
use crate::gainmap::GainMapDescriptor;
use crate::imaging::{EncodeParams, GainMapAsset, ImageBackend, OutputFile, PackedBuffer, Quality};
use crate::metadata::{ImageMetadata, ReconciledMetadata};
use crate::types::RasterImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output container, chosen by file extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Jpeg,
    Heic,
}

impl ContainerFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Heic => "HEIC",
        }
    }
}

/// Container format for `path`: `.jpg`/`.jpeg` or `.heic`, any case.
pub fn container_format(path: &Path) -> Result<ContainerFormat, ResizeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => Ok(ContainerFormat::Jpeg),
        "heic" => Ok(ContainerFormat::Heic),
        _ => Err(ResizeError::UnsupportedFormat(path.display().to_string())),
    }
}

/// `path` with its directory resolved, when the directory exists.
fn resolved(path: &Path) -> Option<PathBuf> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or(Path::new(".")).canonicalize().ok()?;
    Some(dir.join(path.file_name()?))
}

/// Validate the gain-map preview destination before anything is decoded.
///
/// The preview is always a plain JPEG, and it may not land on the main
/// output.
pub fn check_preview_path(preview: &Path, output: &Path) -> Result<(), ResizeError> {
    if container_format(preview)? != ContainerFormat::Jpeg {
        return Err(ResizeError::UnsupportedFormat(preview.display().to_string()));
    }
    let same = preview == output
        || matches!((resolved(preview), resolved(output)), (Some(a), Some(b)) if a == b);
    if same {
        return Err(ResizeError::WriteFailed(format!(
            "gain-map preview {} would overwrite the output",
            preview.display()
        )));
    }
    Ok(())
}

/// Encode the primary raster and its regenerated gain map as one container.
///
/// The extension is checked before the backend is touched. The gain-map
/// buffer must be exactly `descriptor.row_stride * descriptor.height` bytes.
pub fn encode_container(
    backend: &impl ImageBackend,
    primary: &RasterImage,
    descriptor: GainMapDescriptor,
    gain_map: &[u8],
    metadata: &ReconciledMetadata,
    gain_map_metadata: &ImageMetadata,
    path: &Path,
) -> Result<(ContainerFormat, OutputFile), ResizeError> {
    let format = container_format(path)?;
    if gain_map.len() != descriptor.buffer_len() {
        return Err(ResizeError::WriteFailed(format!(
            "gain-map buffer is {} bytes, descriptor needs {}",
            gain_map.len(),
            descriptor.buffer_len()
        )));
    }

    let bytes = backend
        .encode(&EncodeParams {
            format,
            primary,
            properties: &metadata.properties,
            gain_map: GainMapAsset {
                description: &metadata.gain_map_description,
                data: gain_map,
                metadata: gain_map_metadata,
            },
        })
        .map_err(|e| ResizeError::WriteFailed(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), format = format.name(), bytes = bytes.len(), "Encoded output");
    Ok((
        format,
        OutputFile {
            path: path.to_path_buf(),
            bytes,
        },
    ))
}

/// Encode the regenerated gain map as a grayscale JPEG preview.
pub fn encode_preview(
    backend: &impl ImageBackend,
    packed: &PackedBuffer,
    quality: Quality,
    path: &Path,
) -> Result<OutputFile, ResizeError> {
    let failed = |msg: String| ResizeError::WriteFailed(format!("{}: {msg}", path.display()));
    let raster = packed
        .to_l8_raster()
        .ok_or_else(|| failed("gain-map buffer is not single-channel".into()))?;
    let bytes = backend
        .encode_preview(&raster, quality)
        .map_err(|e| failed(e.to_string()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Encoded gain-map preview");
    Ok(OutputFile {
        path: path.to_path_buf(),
        bytes,
    })
}

/// Write every encoded file, or none of them.
pub fn commit(backend: &impl ImageBackend, files: &[OutputFile]) -> Result<(), ResizeError> {
    for file in files {
        info!(path = %file.path.display(), bytes = file.bytes.len(), "Writing");
    }
    backend.commit(files).map_err(|e| {
        let paths: Vec<String> = files.iter().map(|f| f.path.display().to_string()).collect();
        ResizeError::WriteFailed(format!("{}: {e}", paths.join(", ")))
    })
}
