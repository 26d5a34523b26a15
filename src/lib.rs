//! # hdr-resize
//!
//! Resize an HDR photo without losing its HDR rendition. An HDR photo here is
//! an ordinary SDR primary image plus a single-channel *gain map* stored as
//! an auxiliary asset in the same container (Ultra HDR JPEG, or HEIC). The
//! gain map tells an HDR display how far to brighten each region. If only
//! the primary is resized, the gain map no longer lines up and the HDR
//! effect is lost or corrupted.
//!
//! # Pipeline
//!
//! ```text
//! size expr ─► decode ─► extract gain map ─► resample primary
//!     ─► resample gain map to half size ─► pack rows (4-byte aligned)
//!     ─► reconcile metadata ─► encode container (+ preview) ─► commit
//! ```
//!
//! One image per run, one thread, one output. Any failure is terminal and
//! maps to one [`error::ResizeError`] kind.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`size`] | `WxH` / `Wx` / `xH` parsing and aspect-preserving resolution |
//! | [`gainmap`] | Gain-map asset validation and its typed descriptor |
//! | [`metadata`] | Property records and output metadata reconciliation |
//! | [`imaging`] | Codec backend trait, resampling, row packing, Ultra HDR container I/O |
//! | [`dispatch`] | Output container choice by extension, preview checks, encode and commit hand-off |
//! | [`pipeline`] | The end-to-end run that ties the stages together |
//! | [`config`] | Optional TOML config file: default quality and resample filter |
//! | [`output`] | CLI summary formatting |
//! | [`types`] | Raster images and pixel formats shared by every stage |
//! | [`error`] | The failure taxonomy |
//!
//! # Design Decisions
//!
//! ## Gain Map at Half Resolution
//!
//! The regenerated gain map is always `(W/2, H/2)` of the resized primary,
//! integer division. Gain maps are smooth; full resolution doubles the
//! container size for no visible gain.
//!
//! ## Backend Trait
//!
//! All codec work goes through [`imaging::ImageBackend`]. The pure-Rust
//! [`imaging::RustBackend`] handles Ultra HDR JPEG; tests swap in a
//! recording mock so pipeline logic is checked without real image files.
//!
//! Output is two-phase: `encode` and `encode_preview` return bytes, and
//! `commit` writes every file of the run together. A failure in either
//! encode leaves nothing on disk.
//!
//! ## Metadata Is Carried, Never Invented
//!
//! The gain map's hdrgm XMP and ISO 21496-1 block are copied from the
//! source. A secondary image is only treated as the gain map when it carries
//! that metadata or the primary's container directory lists it; a gain map
//! without rendering metadata fails to load.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gainmap;
pub mod imaging;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod size;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
