//! Frame representation for captured surface snapshots
//!
//! This module provides the size, frame and timestamp types shared by the
//! capture, encoder and recorder crates.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of a surface in logical units (points)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: f64,
    pub height: f64,
}

impl LogicalSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Pixel extent of this size at the given scale, truncated per axis
    pub fn to_pixels(&self, scale: f64) -> PixelSize {
        PixelSize::new(
            (self.width * scale).max(0.0) as u32,
            (self.height * scale).max(0.0) as u32,
        )
    }
}

impl std::fmt::Display for LogicalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}pt", self.width, self.height)
    }
}

/// Size of a raster in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either axis collapsed to zero
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A captured snapshot of a surface
///
/// Frames are ephemeral: they live only as long as the call that processes them.
#[derive(Clone)]
pub struct Frame {
    /// Rendered contents in RGBA
    pub image: RgbaImage,
    /// Logical size of the surface at capture time
    pub logical_size: LogicalSize,
}

impl Frame {
    pub fn new(image: RgbaImage, logical_size: LogicalSize) -> Self {
        Self {
            image,
            logical_size,
        }
    }

    /// Pixel dimensions of the raster
    pub fn pixel_size(&self) -> PixelSize {
        PixelSize::new(self.image.width(), self.image.height())
    }

    /// Give up the raster, dropping the size metadata
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("logical_size", &self.logical_size)
            .field("pixels", &self.pixel_size())
            .finish()
    }
}

/// Rational presentation timestamp: `value / timescale` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresentationTime {
    pub value: i64,
    pub timescale: u32,
}

impl PresentationTime {
    pub const ZERO: PresentationTime = PresentationTime {
        value: 0,
        timescale: 1,
    };

    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    /// Timestamp of the `k`-th frame slot (1-indexed) at `fps`: `(k - 1) / fps`
    pub fn for_frame(k: u64, fps: u32) -> Self {
        Self::new(k.saturating_sub(1) as i64, fps)
    }

    /// Express this time in another timescale, truncating
    pub fn rescale(&self, timescale: u32) -> i64 {
        if self.timescale == timescale {
            return self.value;
        }
        (self.value as i128 * timescale as i128 / self.timescale.max(1) as i128) as i64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 / self.timescale.max(1) as f64
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs_f64(self.as_secs_f64().max(0.0))
    }
}

impl std::fmt::Display for PresentationTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}
