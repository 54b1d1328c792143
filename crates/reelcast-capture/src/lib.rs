//! reelcast Capture - Surface snapshot sources
//!
//! A [`Surface`] is anything that can render its current contents into a
//! raster on request. This crate provides:
//! - [`PatternSurface`], an animated test pattern that can be resized at runtime
//! - [`ImageSurface`], a still image panned across the surface

pub mod image_surface;
pub mod pattern;

pub use image_surface::ImageSurface;
pub use pattern::PatternSurface;
pub use reelcast_core::Frame;

use reelcast_core::LogicalSize;

/// A visual surface that can be snapshotted synchronously
pub trait Surface: Send + Sync {
    /// Current logical size of the surface
    fn logical_size(&self) -> LogicalSize;

    /// Render the current contents at `scale` pixels per logical unit.
    ///
    /// The raster is `floor(logical * scale)` pixels on each axis. Returns
    /// `None` when the surface cannot produce an image.
    fn snapshot(&self, scale: f64) -> Option<Frame>;
}
