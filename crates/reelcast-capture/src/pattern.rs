//! Animated procedural test pattern

use crate::Surface;
use image::{Rgba, RgbaImage};
use reelcast_core::{Frame, LogicalSize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

/// Width of the moving bar in logical units
const BAR_WIDTH: f64 = 12.0;
/// Logical units the bar advances per snapshot
const BAR_STEP: f64 = 4.0;

/// Test pattern surface: a gradient background with a bar sweeping across it.
///
/// Every snapshot advances the animation by one step. The surface can be
/// resized or made unavailable while a recording is running.
pub struct PatternSurface {
    size: RwLock<LogicalSize>,
    tick: AtomicU64,
    available: AtomicBool,
}

impl PatternSurface {
    pub fn new(size: LogicalSize) -> Self {
        Self {
            size: RwLock::new(size),
            tick: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Change the logical size of the surface
    pub fn resize(&self, size: LogicalSize) {
        if let Ok(mut guard) = self.size.write() {
            debug!("Pattern surface resized to {}", size);
            *guard = size;
        }
    }

    /// Make snapshots succeed or fail
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of snapshots rendered so far
    pub fn snapshots_taken(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }
}

impl Surface for PatternSurface {
    fn logical_size(&self) -> LogicalSize {
        self.size
            .read()
            .map(|g| *g)
            .unwrap_or(LogicalSize::new(0.0, 0.0))
    }

    fn snapshot(&self, scale: f64) -> Option<Frame> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }

        let logical = self.logical_size();
        let pixels = logical.to_pixels(scale);
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);

        let bar_width = (BAR_WIDTH * scale).max(1.0) as u32;
        let travel = pixels.width.max(1) as u64;
        let bar_x = ((tick as f64 * BAR_STEP * scale) as u64 % travel) as u32;

        let image = RgbaImage::from_fn(pixels.width, pixels.height, |x, y| {
            if x >= bar_x && x < bar_x.saturating_add(bar_width) {
                return Rgba([255, 255, 255, 255]);
            }
            let r = (x * 255 / pixels.width.max(1)) as u8;
            let g = (y * 255 / pixels.height.max(1)) as u8;
            let b = (tick % 256) as u8;
            Rgba([r, g, b, 255])
        });

        Some(Frame::new(image, logical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_matches_scale() {
        let surface = PatternSurface::new(LogicalSize::new(50.0, 40.0));
        let frame = surface.snapshot(2.0).unwrap();
        assert_eq!(frame.image.dimensions(), (100, 80));
        assert_eq!(frame.logical_size, LogicalSize::new(50.0, 40.0));
    }

    #[test]
    fn test_animation_advances() {
        let surface = PatternSurface::new(LogicalSize::new(64.0, 16.0));
        let first = surface.snapshot(1.0).unwrap();
        let second = surface.snapshot(1.0).unwrap();
        assert_ne!(first.image.as_raw(), second.image.as_raw());
        assert_eq!(surface.snapshots_taken(), 2);
    }

    #[test]
    fn test_resize_and_availability() {
        let surface = PatternSurface::new(LogicalSize::new(32.0, 32.0));
        surface.resize(LogicalSize::new(48.0, 32.0));
        assert_eq!(surface.logical_size(), LogicalSize::new(48.0, 32.0));

        surface.set_available(false);
        assert!(surface.snapshot(1.0).is_none());
        surface.set_available(true);
        assert!(surface.snapshot(1.0).is_some());
    }
}
