//! Raster types shared by the pipeline and the codec backend.
//!
//! A [`RasterImage`] owns its pixel buffer. Each pipeline stage consumes one
//! raster and produces a new one; nothing is resized in place.

/// Pixel layouts the pipeline moves between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single 8-bit luma channel. The only layout a gain map may have.
    L8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::L8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }

    /// All supported layouts are 8 bits per component.
    pub fn bytes_per_pixel(self) -> usize {
        self.channels()
    }

    /// Name used in gain-map descriptors (`PixelFormat` property).
    pub fn name(self) -> &'static str {
        match self {
            Self::L8 => "L8",
            Self::Rgb8 => "RGB8",
            Self::Rgba8 => "RGBA8",
        }
    }
}

/// Color space attached to a raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorSpace {
    Srgb,
    /// Embedded ICC profile bytes, carried through to the output untouched.
    Icc(Vec<u8>),
}

/// An owned pixel buffer plus its geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    /// Bytes per scanline; may exceed `width * bytes_per_pixel` for padding.
    pub row_stride: usize,
    pub color_space: Option<ColorSpace>,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Wrap a tightly packed buffer (no row padding).
    pub fn from_tight(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        color_space: Option<ColorSpace>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            width,
            height,
            bits_per_component: 8,
            row_stride: width as usize * pixel_format.bytes_per_pixel(),
            color_space,
            pixel_format,
            data,
        }
    }

    /// Bytes of pixel data in one row, excluding padding.
    pub fn row_len(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Pixel bytes of row `y`, without padding. `None` if the buffer is short.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let start = y as usize * self.row_stride;
        self.data.get(start..start + self.row_len())
    }

    /// True when every row fits in the buffer and the stride covers a row.
    pub fn is_consistent(&self) -> bool {
        self.row_stride >= self.row_len()
            && (self.height == 0
                || self.data.len() >= (self.height as usize - 1) * self.row_stride + self.row_len())
    }

    /// Copy out the pixels with row padding removed.
    pub fn to_tight(&self) -> Option<Vec<u8>> {
        if !self.is_consistent() {
            return None;
        }
        if self.row_stride == self.row_len() {
            return Some(self.data[..self.row_len() * self.height as usize].to_vec());
        }
        let mut out = Vec::with_capacity(self.row_len() * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y)?);
        }
        Some(out)
    }
}
