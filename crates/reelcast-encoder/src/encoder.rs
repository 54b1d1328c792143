//! H.264 encoder using OpenH264
//!
//! OpenH264 is Cisco's open-source H.264 codec that automatically downloads
//! prebuilt binaries, making it easy to use without system dependencies.

use crate::pixel::I420Buffer;
use openh264::encoder::{Encoder, EncoderConfig, RateControlMode};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use reelcast_core::{Error, PixelSize, Result};
use tracing::{debug, info};

/// NAL unit type of an IDR slice
pub const NAL_IDR: u8 = 5;
/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set
pub const NAL_PPS: u8 = 8;

/// H.264 encoder wrapper producing Annex B access units
pub struct H264Encoder {
    encoder: Encoder,
    size: PixelSize,
    frame_count: u64,
}

impl H264Encoder {
    /// Create a new H.264 encoder
    pub fn new(size: PixelSize, fps: u32, bitrate: u32) -> Result<Self> {
        let config = EncoderConfig::new()
            .max_frame_rate(fps as f32)
            .rate_control_mode(RateControlMode::Bitrate)
            .set_bitrate_bps(bitrate.saturating_mul(1000)) // Convert kbps to bps
            .enable_skip_frame(false);

        let api = OpenH264API::from_source();
        let encoder = Encoder::with_api_config(api, config)
            .map_err(|e| Error::EncoderError(format!("Failed to create encoder: {}", e)))?;

        info!(
            "H.264 encoder initialized: {} @ {} fps, {} kbps",
            size, fps, bitrate
        );

        Ok(Self {
            encoder,
            size,
            frame_count: 0,
        })
    }

    /// Encode one picture
    pub fn encode(&mut self, buffer: I420Buffer) -> Result<EncodedFrame> {
        if buffer.size() != self.size {
            return Err(Error::EncoderError(format!(
                "Pixel buffer is {}, encoder expects {}",
                buffer.size(),
                self.size
            )));
        }

        let yuv = YUVBuffer::from_vec(
            buffer.into_vec(),
            self.size.width as usize,
            self.size.height as usize,
        );

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| Error::EncoderError(format!("Encoding failed: {}", e)))?;

        let data = bitstream.to_vec();
        let is_keyframe = nal_units(&data)
            .any(|nal| matches!(nal_type(nal), Some(NAL_IDR) | Some(NAL_SPS)));

        debug!(
            "Encoded frame {}: {} bytes, keyframe={}",
            self.frame_count,
            data.len(),
            is_keyframe
        );

        self.frame_count += 1;

        Ok(EncodedFrame { data, is_keyframe })
    }
}

/// Represents an encoded video frame
#[derive(Clone)]
pub struct EncodedFrame {
    /// Encoded NAL data with Annex B start codes
    pub data: Vec<u8>,
    /// Whether this is a keyframe
    pub is_keyframe: bool,
}

impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("size", &self.data.len())
            .field("is_keyframe", &self.is_keyframe)
            .finish()
    }
}

/// Type of a NAL unit (without start code)
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Iterate the NAL units of an Annex B stream, without their start codes.
///
/// Both 3-byte and 4-byte start codes are recognized.
pub fn nal_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&next) => next - 3,
            None => data.len(),
        };
        // Zero byte of a 4-byte start code, and trailing zeros, belong to no unit
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            units.push(&data[start..end]);
        }
    }
    units.into_iter()
}
