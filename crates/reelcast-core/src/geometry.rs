//! Encoder-legal frame geometry
//!
//! H.264 encodes in 16x16 macroblocks. Frame sizes are rounded down to that
//! alignment so the encoder never pads the picture.

use crate::frame::{LogicalSize, PixelSize};

/// Alignment every encoded width and height is a multiple of
pub const MACROBLOCK_ALIGNMENT: u32 = 16;

/// Derive the encoded pixel dimensions for a surface.
///
/// Each axis is `floor(axis * scale / 16) * 16`. Sizes smaller than one
/// macroblock collapse to zero; callers check [`PixelSize::is_degenerate`].
pub fn normalize(logical: LogicalSize, scale: f64) -> PixelSize {
    let pixels = logical.to_pixels(scale);
    PixelSize::new(align_down(pixels.width), align_down(pixels.height))
}

/// Convert normalized pixel dimensions back to logical units
pub fn to_logical(pixels: PixelSize, scale: f64) -> LogicalSize {
    LogicalSize::new(pixels.width as f64 / scale, pixels.height as f64 / scale)
}

fn align_down(value: u32) -> u32 {
    (value / MACROBLOCK_ALIGNMENT) * MACROBLOCK_ALIGNMENT
}
