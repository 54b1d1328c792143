//! reelcast Encoder - turns captured rasters into an H.264 MP4 file
//!
//! This crate provides the encode side of a recording:
//! - centered cropping to macroblock-aligned dimensions
//! - RGBA to I420 conversion and H.264 encoding using OpenH264
//! - a fragmented MP4 writer for a single contiguous file
//! - [`FrameEncoder`], which runs all of the above on one worker thread

pub mod crop;
pub mod encoder;
pub mod mp4;
pub mod pipeline;
pub mod pixel;
pub mod writer;

pub use crop::crop_centered;
pub use encoder::H264Encoder;
pub use mp4::Mp4Muxer;
pub use pipeline::{EncoderSettings, FrameEncoder};
pub use pixel::I420Buffer;
pub use writer::{Mp4FileWriter, VideoSink};
