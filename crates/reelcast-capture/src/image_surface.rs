//! Still image surface

use crate::Surface;
use image::{imageops, imageops::FilterType, RgbaImage};
use reelcast_core::{Error, Frame, LogicalSize, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Pixels the image pans per snapshot, at scale 1
const PAN_STEP: f64 = 2.0;

/// Surface showing a still image that pans horizontally on each snapshot.
///
/// The source is drawn at one logical unit per source pixel and wraps around
/// at the right edge.
pub struct ImageSurface {
    source: RgbaImage,
    tick: AtomicU64,
}

impl ImageSurface {
    pub fn new(source: RgbaImage) -> Self {
        Self {
            source,
            tick: AtomicU64::new(0),
        }
    }

    /// Load a PNG from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = image::open(path)
            .map_err(|e| Error::Config(format!("Failed to load {}: {}", path.display(), e)))?
            .to_rgba8();
        info!(
            "Loaded surface image {} ({}x{})",
            path.display(),
            source.width(),
            source.height()
        );
        Ok(Self::new(source))
    }
}

impl Surface for ImageSurface {
    fn logical_size(&self) -> LogicalSize {
        LogicalSize::new(self.source.width() as f64, self.source.height() as f64)
    }

    fn snapshot(&self, scale: f64) -> Option<Frame> {
        let logical = self.logical_size();
        let pixels = logical.to_pixels(scale);
        if pixels.is_degenerate() {
            return None;
        }

        let scaled = if pixels.width == self.source.width() && pixels.height == self.source.height() {
            self.source.clone()
        } else {
            imageops::resize(&self.source, pixels.width, pixels.height, FilterType::Triangle)
        };

        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let offset = ((tick as f64 * PAN_STEP * scale) as u64 % pixels.width as u64) as u32;

        let mut image = RgbaImage::new(pixels.width, pixels.height);
        let right = imageops::crop_imm(&scaled, offset, 0, pixels.width - offset, pixels.height);
        imageops::replace(&mut image, &right.to_image(), 0, 0);
        if offset > 0 {
            let left = imageops::crop_imm(&scaled, 0, 0, offset, pixels.height);
            imageops::replace(&mut image, &left.to_image(), (pixels.width - offset) as i64, 0);
        }

        Some(Frame::new(image, logical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    fn striped(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| Rgba([x as u8, 0, 0, 255]))
    }

    #[test]
    fn test_pans_and_wraps() {
        let surface = ImageSurface::new(striped(10, 4));
        let first = surface.snapshot(1.0).unwrap();
        assert_eq!(first.image.get_pixel(0, 0)[0], 0);

        let second = surface.snapshot(1.0).unwrap();
        assert_eq!(second.image.get_pixel(0, 0)[0], 2);
        assert_eq!(second.image.get_pixel(8, 0)[0], 0);
    }

    #[test]
    fn test_scaled_snapshot() {
        let surface = ImageSurface::new(striped(10, 4));
        let frame = surface.snapshot(2.0).unwrap();
        assert_eq!(frame.image.dimensions(), (20, 8));
        assert_eq!(frame.logical_size, LogicalSize::new(10.0, 4.0));
    }

    #[test]
    fn test_open_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("surface.png");
        striped(16, 16).save(&path).unwrap();

        let surface = ImageSurface::open(&path).unwrap();
        assert_eq!(surface.logical_size(), LogicalSize::new(16.0, 16.0));
        assert!(ImageSurface::open(dir.path().join("missing.png")).is_err());
    }
}
