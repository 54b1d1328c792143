//! reelcast Core - Shared types, configuration and geometry
//!
//! This crate provides the foundational types used across all reelcast components.

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod geometry;

pub use config::{RecorderConfig, MAX_REFRESH_RATE};
pub use error::{Error, Result};
pub use event::{RecordingEvent, RecordingSummary, SessionId};
pub use frame::{Frame, LogicalSize, PixelSize, PresentationTime};
pub use geometry::MACROBLOCK_ALIGNMENT;
