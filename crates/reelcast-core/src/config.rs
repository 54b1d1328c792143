//! Configuration types for reelcast

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fastest display refresh, and so the fastest frame rate, a recorder accepts
pub const MAX_REFRESH_RATE: u32 = 1000;

/// Main configuration for a recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Target frame rate
    pub fps: u32,
    /// Pixels per logical unit on the device
    pub scale_factor: f64,
    /// Video bitrate in kbps
    pub bitrate: u32,
    /// Refresh rate of the display driving the frame clock
    pub display_refresh_rate: u32,
    /// Frames allowed to queue behind the encoder before new ones are dropped
    pub max_pending_frames: usize,
    /// Directory for session files (process temp dir if None)
    pub output_dir: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            scale_factor: 2.0,
            bitrate: 4000,
            display_refresh_rate: 60,
            max_pending_frames: 4,
            output_dir: None,
        }
    }
}

impl RecorderConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        debug!("Loaded recorder config from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Builder pattern: set frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Builder pattern: set scale factor
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// Builder pattern: set bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Builder pattern: set display refresh rate
    pub fn with_display_refresh_rate(mut self, hz: u32) -> Self {
        self.display_refresh_rate = hz;
        self
    }

    /// Builder pattern: set backlog limit
    pub fn with_max_pending_frames(mut self, frames: usize) -> Self {
        self.max_pending_frames = frames;
        self
    }

    /// Builder pattern: set output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Directory new recordings are written to
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Check the values a recording cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(Error::InvalidFrameRate(self.fps));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(Error::InvalidScaleFactor(self.scale_factor));
        }
        if self.display_refresh_rate == 0 || self.display_refresh_rate > MAX_REFRESH_RATE {
            return Err(Error::Config(format!(
                "display_refresh_rate must be between 1 and {} Hz",
                MAX_REFRESH_RATE
            )));
        }
        if self.bitrate == 0 {
            return Err(Error::Config("bitrate must be positive".to_string()));
        }
        Ok(())
    }
}
