//! Video sinks: the writer the encoder worker appends pixel buffers to

use crate::encoder::H264Encoder;
use crate::mp4::{self, Mp4Muxer, Sample};
use crate::pixel::I420Buffer;
use reelcast_core::{Error, PixelSize, PresentationTime, Result};
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destination for timestamped pixel buffers.
///
/// A sink lives on the encoder worker for its whole life and is never shared.
pub trait VideoSink {
    /// Whether the sink can take another buffer right now
    fn is_ready_for_more_data(&self) -> bool {
        true
    }

    /// Append one picture shown at `pts`. Timestamps arrive strictly increasing.
    fn append(&mut self, buffer: I420Buffer, pts: PresentationTime) -> Result<()>;

    /// End the stream at `end` and make it durable. Returns the stream duration.
    fn finish(&mut self, end: PresentationTime) -> Result<Duration>;

    /// Discard everything written so far
    fn abort(&mut self);
}

/// Sample held back until the next timestamp fixes its duration
struct HeldSample {
    data: Vec<u8>,
    decode_time: u64,
    is_keyframe: bool,
}

/// Writes an H.264 stream into a fragmented MP4 file
pub struct Mp4FileWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    encoder: H264Encoder,
    muxer: Mp4Muxer,
    duration_offset: Option<u64>,
    held: Option<HeldSample>,
    samples_written: u64,
}

impl Mp4FileWriter {
    /// Create the output file and the encoder feeding it
    pub fn create(path: &Path, size: PixelSize, fps: u32, bitrate: u32) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            Error::output_stream(format!("Failed to create {}: {}", path.display(), e))
        })?;
        let encoder = H264Encoder::new(size, fps, bitrate)?;

        info!("Writing {} MP4 to {}", size, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(BufWriter::new(file)),
            encoder,
            muxer: Mp4Muxer::new(size, fps),
            duration_offset: None,
            held: None,
            samples_written: 0,
        })
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::output_stream("output file already closed"))
    }

    fn write_init_segment(&mut self) -> Result<()> {
        let init = self.muxer.create_init_segment();
        let offset = mp4::duration_field_offset(&init)
            .ok_or_else(|| Error::EncoderError("init segment lacks mehd".to_string()))?;
        self.file()?.write_all(&init)?;
        self.duration_offset = Some(offset as u64);
        info!("Stream opened, codec {}", self.muxer.codec_string());
        Ok(())
    }

    fn write_sample(&mut self, held: HeldSample, duration: u64) -> Result<()> {
        let sample = Sample {
            data: held.data,
            decode_time: held.decode_time,
            duration: duration.min(u32::MAX as u64) as u32,
            is_keyframe: held.is_keyframe,
        };
        let segment = self.muxer.create_media_segment(&sample);
        self.file()?.write_all(&segment)?;
        self.samples_written += 1;
        Ok(())
    }

    fn patch_duration(&mut self, total: u64) -> Result<()> {
        let offset = match self.duration_offset {
            Some(offset) => offset,
            None => return Ok(()),
        };
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&total.to_be_bytes())?;
        file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn remove_file(&mut self) {
        self.file.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

impl VideoSink for Mp4FileWriter {
    fn append(&mut self, buffer: I420Buffer, pts: PresentationTime) -> Result<()> {
        let encoded = self.encoder.encode(buffer)?;
        let unit = mp4::split_access_unit(&encoded.data);

        if !self.muxer.has_parameter_sets() {
            match (unit.sps, unit.pps) {
                (Some(sps), Some(pps)) => {
                    self.muxer.set_parameter_sets(sps, pps);
                    self.write_init_segment()?;
                }
                _ => {
                    return Err(Error::EncoderError(
                        "first encoded frame carried no SPS/PPS".to_string(),
                    ))
                }
            }
        }

        if unit.sample.is_empty() {
            debug!("Encoder produced no slice data at {}", pts);
            return Ok(());
        }

        let decode_time = pts.rescale(self.muxer.timescale()).max(0) as u64;
        if let Some(previous) = self.held.take() {
            // Spans any slots whose frames were dropped
            let duration = decode_time.saturating_sub(previous.decode_time);
            self.write_sample(previous, duration)?;
        }

        self.held = Some(HeldSample {
            data: unit.sample,
            decode_time,
            is_keyframe: encoded.is_keyframe,
        });
        Ok(())
    }

    fn finish(&mut self, end: PresentationTime) -> Result<Duration> {
        let last = match self.held.take() {
            Some(last) => last,
            None => {
                self.remove_file();
                return Err(Error::EmptyRecording);
            }
        };

        let end_time = end.rescale(self.muxer.timescale()).max(0) as u64;
        let duration = end_time
            .saturating_sub(last.decode_time)
            .max(self.muxer.frame_duration() as u64);
        let total = last.decode_time + duration;
        self.write_sample(last, duration)?;
        self.patch_duration(total)?;

        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::output_stream("output file already closed"))?;
        file.flush()?;
        file.get_ref().sync_all()?;

        info!(
            "Finished {}: {} samples, {} ms",
            self.path.display(),
            self.samples_written,
            total * 1000 / self.muxer.timescale() as u64
        );

        Ok(Duration::from_secs_f64(
            total as f64 / self.muxer.timescale() as f64,
        ))
    }

    fn abort(&mut self) {
        debug!("Discarding partial recording {}", self.path.display());
        self.held = None;
        self.remove_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn picture(shade: u8) -> I420Buffer {
        I420Buffer::from_rgba(&RgbaImage::from_pixel(32, 32, Rgba([shade, 64, 128, 255]))).unwrap()
    }

    #[test]
    fn test_finish_without_samples_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        let mut writer = Mp4FileWriter::create(&path, PixelSize::new(32, 32), 30, 500).unwrap();
        assert!(path.exists());

        let result = writer.finish(PresentationTime::for_frame(1, 30));
        assert!(matches!(result, Err(Error::EmptyRecording)));
        assert!(!path.exists());
    }

    #[test]
    fn test_duration_spans_gaps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gaps.mp4");
        let mut writer = Mp4FileWriter::create(&path, PixelSize::new(32, 32), 10, 500).unwrap();

        // Slots 1, 2 and 5 written; 3 and 4 were dropped upstream
        writer.append(picture(0), PresentationTime::for_frame(1, 10)).unwrap();
        writer.append(picture(80), PresentationTime::for_frame(2, 10)).unwrap();
        writer.append(picture(160), PresentationTime::for_frame(5, 10)).unwrap();
        let duration = writer.finish(PresentationTime::for_frame(5, 10)).unwrap();

        assert_eq!(duration, Duration::from_millis(500));
        let bytes = std::fs::read(&path).unwrap();
        let moofs = bytes.windows(4).filter(|w| w == b"moof").count();
        assert_eq!(moofs, 3);
    }

    #[test]
    fn test_abort_after_empty_finish_is_quiet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("twice.mp4");
        let mut writer = Mp4FileWriter::create(&path, PixelSize::new(32, 32), 30, 500).unwrap();
        assert!(matches!(
            writer.finish(PresentationTime::for_frame(1, 30)),
            Err(Error::EmptyRecording)
        ));
        writer.abort();
        assert!(!path.exists());
    }

    #[test]
    fn test_abort_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aborted.mp4");
        let mut writer = Mp4FileWriter::create(&path, PixelSize::new(32, 32), 30, 500).unwrap();
        writer.append(picture(10), PresentationTime::for_frame(1, 30)).unwrap();
        writer.abort();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("out.mp4");
        let result = Mp4FileWriter::create(&path, PixelSize::new(32, 32), 30, 500);
        assert!(matches!(result, Err(Error::OutputStream(_))));
    }
}
