//! Row-aligned buffers for regenerated gain maps.
//!
//! A [`PackedBuffer`] is allocated zeroed at exactly `row_stride * height`
//! bytes. The backend fills it row by row; the padding at the end of each
//! row stays zero and is never read by a conforming decoder.

use super::calculations::aligned_row_stride;
use crate::gainmap::GainMapDescriptor;
use crate::types::{PixelFormat, RasterImage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBuffer {
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    row_stride: usize,
    data: Vec<u8>,
}

impl PackedBuffer {
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize) -> Self {
        let row_stride = aligned_row_stride(width, bytes_per_pixel);
        Self {
            width,
            height,
            bytes_per_pixel,
            row_stride,
            data: vec![0u8; row_stride * height as usize],
        }
    }

    /// Single-channel 8-bit buffer, the gain-map layout.
    pub fn l8(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writable pixel bytes of row `y`, excluding padding.
    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_stride;
        let len = self.width as usize * self.bytes_per_pixel;
        self.data.get_mut(start..start + len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn descriptor(&self) -> GainMapDescriptor {
        GainMapDescriptor::new(self.width, self.height, self.row_stride)
    }

    /// View the buffer as a padded L8 raster (copies the bytes).
    ///
    /// `None` unless the buffer is single-channel.
    pub fn to_l8_raster(&self) -> Option<RasterImage> {
        (self.bytes_per_pixel == 1).then(|| RasterImage {
            width: self.width,
            height: self.height,
            bits_per_component: 8,
            row_stride: self.row_stride,
            color_space: None,
            pixel_format: PixelFormat::L8,
            data: self.data.clone(),
        })
    }
}
