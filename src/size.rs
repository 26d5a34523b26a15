//! Target-size expressions: `WxH`, `Wx`, and `xH`.
//!
//! A size expression names the output dimensions of the primary image. Either
//! side may be omitted, in which case it is derived from the source aspect
//! ratio once the source has been decoded:
//!
//! ```text
//! 2000x1500  →  Explicit(2000, 1500)   used verbatim
//! 2000x      →  WidthOnly(2000)        height = round(2000 / (srcW / srcH))
//! x1500      →  HeightOnly(1500)       width  = round(1500 * (srcW / srcH))
//! ```

use crate::error::ResizeError;

const SEPARATOR: char = 'x';

/// A parsed size expression, not yet tied to a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDirective {
    Explicit { width: u32, height: u32 },
    WidthOnly(u32),
    HeightOnly(u32),
}

/// Final primary-image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSize {
    pub width: u32,
    pub height: u32,
}

/// Parse a size expression.
///
/// The expression must split into exactly two parts on `x`. Non-empty parts
/// must be positive integers, and at least one part must be non-empty.
pub fn parse(expr: &str) -> Result<SizeDirective, ResizeError> {
    let invalid = || ResizeError::InvalidSizeSpec(expr.to_string());

    let parts: Vec<&str> = expr.split(SEPARATOR).collect();
    let [w, h] = parts.as_slice() else {
        return Err(invalid());
    };

    match (w.is_empty(), h.is_empty()) {
        (false, false) => Ok(SizeDirective::Explicit {
            width: parse_dimension(w).ok_or_else(invalid)?,
            height: parse_dimension(h).ok_or_else(invalid)?,
        }),
        (false, true) => parse_dimension(w)
            .map(SizeDirective::WidthOnly)
            .ok_or_else(invalid),
        (true, false) => parse_dimension(h)
            .map(SizeDirective::HeightOnly)
            .ok_or_else(invalid),
        (true, true) => Err(invalid()),
    }
}

fn parse_dimension(part: &str) -> Option<u32> {
    part.parse::<u32>().ok().filter(|&n| n > 0)
}

/// Resolve a directive against the source dimensions.
///
/// The aspect ratio is `source_width / source_height` in `f64`; the derived
/// side is rounded to the nearest integer (halves away from zero).
pub fn resolve(directive: SizeDirective, source_width: u32, source_height: u32) -> ResolvedSize {
    let aspect = source_width as f64 / source_height as f64;
    match directive {
        SizeDirective::Explicit { width, height } => ResolvedSize { width, height },
        SizeDirective::WidthOnly(width) => ResolvedSize {
            width,
            height: (width as f64 / aspect).round() as u32,
        },
        SizeDirective::HeightOnly(height) => ResolvedSize {
            width: (height as f64 * aspect).round() as u32,
            height,
        },
    }
}
