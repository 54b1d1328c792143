//! reelcast Recorder - Drives a surface into an encoder
//!
//! [`RecordingSession`] owns the Idle, Recording and Finishing states of one
//! recorder. While recording, a [`FrameClock`] snapshots the surface on every
//! tick and hands the raster to a [`reelcast_encoder::FrameEncoder`].

pub mod clock;
pub mod session;

pub use clock::FrameClock;
pub use session::{EncoderFactory, RecordingSession, SessionState};
