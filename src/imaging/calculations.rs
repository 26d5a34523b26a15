//! Pure calculation functions for gain-map geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// Row alignment, in bytes, of regenerated rasters.
pub const ROW_ALIGNMENT: usize = 4;

/// Dimensions of the regenerated gain map for a resized primary image.
///
/// Always half the primary in each direction (floored), whatever the source
/// gain map's resolution was. The output gain map is therefore a quarter of
/// the primary's area by convention.
///
/// # Examples
/// ```
/// # use hdr_resize::imaging::gain_map_dimensions;
/// assert_eq!(gain_map_dimensions(2000, 1500), (1000, 750));
/// assert_eq!(gain_map_dimensions(1001, 3), (500, 1));
/// ```
pub fn gain_map_dimensions(main_width: u32, main_height: u32) -> (u32, u32) {
    (main_width / 2, main_height / 2)
}

/// Row stride for `width` pixels of `bytes_per_pixel`, rounded up to the
/// next multiple of [`ROW_ALIGNMENT`].
///
/// # Examples
/// ```
/// # use hdr_resize::imaging::aligned_row_stride;
/// assert_eq!(aligned_row_stride(1000, 1), 1000);
/// assert_eq!(aligned_row_stride(501, 1), 504);
/// ```
pub fn aligned_row_stride(width: u32, bytes_per_pixel: usize) -> usize {
    let unaligned = width as usize * bytes_per_pixel;
    (unaligned + (ROW_ALIGNMENT - 1)) & !(ROW_ALIGNMENT - 1)
}
