//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image` JPEG decoder + MPF index for the gain map |
//! | **Resample** | `resize_exact` (Lanczos3 or Catmull-Rom) |
//! | **Pack** | [`PackedBuffer`], 4-byte aligned rows |
//! | **Encode** | `JpegEncoder` + Ultra HDR container assembly |
//! | **Commit** | staged `NamedTempFile`s, persisted once all outputs encoded |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and stride math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Packer**: Zeroed, row-aligned buffers for regenerated gain maps
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod jpeg_container;
pub mod operations;
mod packer;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, SourceImage};
pub use calculations::{ROW_ALIGNMENT, aligned_row_stride, gain_map_dimensions};
pub use operations::{regenerate_gain_map, resample_primary};
pub use packer::PackedBuffer;
pub use params::{EncodeParams, GainMapAsset, OutputFile, Quality, ResampleFilter};
pub use rust_backend::RustBackend;
