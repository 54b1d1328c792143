//! Fragmented MP4 muxer for a single contiguous video file
//!
//! The file is an init segment (`ftyp` + `moov`) followed by one
//! `moof` + `mdat` fragment per sample. Each fragment carries its decode time
//! in `tfdt`, so gaps in the timeline survive muxing. The `mehd` box holds the
//! total duration and is patched once the recording finishes.

use crate::encoder::{nal_type, nal_units, NAL_PPS, NAL_SPS};
use bytes::{BufMut, BytesMut};
use reelcast_core::PixelSize;

/// Timescale ticks per frame
pub const TICKS_PER_FRAME: u32 = 1000;

/// One encoded access unit ready to be written
#[derive(Debug, Clone)]
pub struct Sample {
    /// Length-prefixed NAL units
    pub data: Vec<u8>,
    /// Decode time in timescale units
    pub decode_time: u64,
    /// Duration in timescale units
    pub duration: u32,
    /// Whether this is a sync sample
    pub is_keyframe: bool,
}

/// Parameter sets and slice data split out of an Annex B access unit
#[derive(Debug, Default)]
pub struct AccessUnit {
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
    /// Remaining NAL units, each prefixed with its 4-byte length
    pub sample: Vec<u8>,
}

/// Convert an Annex B access unit into MP4 sample layout.
///
/// SPS and PPS are pulled out for the `avcC` box; all other units are
/// length-prefixed.
pub fn split_access_unit(annexb: &[u8]) -> AccessUnit {
    let mut unit = AccessUnit::default();
    for nal in nal_units(annexb) {
        match nal_type(nal) {
            Some(NAL_SPS) => unit.sps = Some(nal.to_vec()),
            Some(NAL_PPS) => unit.pps = Some(nal.to_vec()),
            _ => {
                unit.sample.put_u32(nal.len() as u32);
                unit.sample.put_slice(nal);
            }
        }
    }
    unit
}

/// Byte offset of the 64-bit duration field of `mehd` within an init segment
pub fn duration_field_offset(init_segment: &[u8]) -> Option<usize> {
    init_segment
        .windows(4)
        .position(|w| w == b"mehd")
        .map(|pos| pos + 4 + 4) // box type, then version + flags
}

/// Fragmented MP4 muxer for H.264 streams
pub struct Mp4Muxer {
    width: u32,
    height: u32,
    timescale: u32,
    sequence_number: u32,
    sps: Vec<u8>,
    pps: Vec<u8>,
}

impl Mp4Muxer {
    /// Create a new fMP4 muxer
    pub fn new(size: PixelSize, fps: u32) -> Self {
        Self {
            width: size.width,
            height: size.height,
            timescale: fps * TICKS_PER_FRAME, // Higher timescale for precision
            sequence_number: 1,
            sps: Vec::new(),
            pps: Vec::new(),
        }
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Duration of one frame in timescale units
    pub fn frame_duration(&self) -> u32 {
        TICKS_PER_FRAME
    }

    /// Get the codec string (avc1.PPCCLL format)
    pub fn codec_string(&self) -> String {
        if self.sps.len() >= 4 {
            format!(
                "avc1.{:02x}{:02x}{:02x}",
                self.sps[1], self.sps[2], self.sps[3]
            )
        } else {
            // Fallback: Constrained Baseline, level 3.1
            "avc1.42e01f".to_string()
        }
    }

    pub fn has_parameter_sets(&self) -> bool {
        !self.sps.is_empty() && !self.pps.is_empty()
    }

    /// Set the SPS and PPS NAL units (without start codes)
    pub fn set_parameter_sets(&mut self, sps: Vec<u8>, pps: Vec<u8>) {
        self.sps = sps;
        self.pps = pps;
    }

    /// Generate the initialization segment (ftyp + moov)
    pub fn create_init_segment(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        // ftyp box
        self.write_ftyp(&mut buf);

        // moov box
        self.write_moov(&mut buf);

        buf.to_vec()
    }

    /// Create a media fragment (moof + mdat) for one sample
    pub fn create_media_segment(&mut self, sample: &Sample) -> Vec<u8> {
        // The data offset field is fixed-width, so the moof size does not depend on it
        let moof_size = {
            let mut probe = BytesMut::new();
            self.write_moof(&mut probe, sample, 0);
            probe.len()
        };

        let mut buf = BytesMut::new();

        // moof box
        self.write_moof(&mut buf, sample, (moof_size + 8) as u32);

        // mdat box
        self.write_mdat(&mut buf, &sample.data);

        self.sequence_number += 1;

        buf.to_vec()
    }

    fn write_box(buf: &mut BytesMut, box_type: &[u8; 4], content: &[u8]) {
        let size = 8 + content.len() as u32;
        buf.put_u32(size);
        buf.put_slice(box_type);
        buf.put_slice(content);
    }

    fn write_ftyp(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_slice(b"isom"); // major brand
        content.put_u32(0x200); // minor version
        content.put_slice(b"isomiso2iso5avc1mp41"); // compatible brands
        Self::write_box(buf, b"ftyp", &content);
    }

    fn write_moov(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_mvhd(&mut content);
        self.write_trak(&mut content);
        self.write_mvex(&mut content);
        Self::write_box(buf, b"moov", &content);
    }

    fn write_matrix(buf: &mut BytesMut) {
        // Identity
        buf.put_u32(0x00010000);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0x00010000);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0x40000000);
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 0]); // flags
        content.put_u32(0); // creation time
        content.put_u32(0); // modification time
        content.put_u32(self.timescale); // timescale
        content.put_u32(0); // duration (carried by mehd)
        content.put_u32(0x00010000); // rate (1.0)
        content.put_u16(0x0100); // volume (1.0)
        content.put_u16(0); // reserved
        content.put_u64(0); // reserved
        Self::write_matrix(&mut content);
        // Pre-defined
        for _ in 0..6 {
            content.put_u32(0);
        }
        content.put_u32(2); // next track ID
        Self::write_box(buf, b"mvhd", &content);
    }

    fn write_trak(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_tkhd(&mut content);
        self.write_mdia(&mut content);
        Self::write_box(buf, b"trak", &content);
    }

    fn write_tkhd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 3]); // flags (track enabled + in movie)
        content.put_u32(0); // creation time
        content.put_u32(0); // modification time
        content.put_u32(1); // track ID
        content.put_u32(0); // reserved
        content.put_u32(0); // duration
        content.put_u64(0); // reserved
        content.put_u16(0); // layer
        content.put_u16(0); // alternate group
        content.put_u16(0); // volume
        content.put_u16(0); // reserved
        Self::write_matrix(&mut content);
        content.put_u32(self.width << 16); // width (fixed-point)
        content.put_u32(self.height << 16); // height (fixed-point)
        Self::write_box(buf, b"tkhd", &content);
    }

    fn write_mdia(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_mdhd(&mut content);
        self.write_hdlr(&mut content);
        self.write_minf(&mut content);
        Self::write_box(buf, b"mdia", &content);
    }

    fn write_mdhd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 0]); // flags
        content.put_u32(0); // creation time
        content.put_u32(0); // modification time
        content.put_u32(self.timescale);
        content.put_u32(0); // duration
        content.put_u16(0x55C4); // language (und)
        content.put_u16(0); // pre-defined
        Self::write_box(buf, b"mdhd", &content);
    }

    fn write_hdlr(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 0]); // flags
        content.put_u32(0); // pre-defined
        content.put_slice(b"vide"); // handler type
        content.put_u32(0); // reserved
        content.put_u32(0);
        content.put_u32(0);
        content.put_slice(b"VideoHandler\0"); // name
        Self::write_box(buf, b"hdlr", &content);
    }

    fn write_minf(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_vmhd(&mut content);
        self.write_dinf(&mut content);
        self.write_stbl(&mut content);
        Self::write_box(buf, b"minf", &content);
    }

    fn write_vmhd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 1]); // flags
        content.put_u16(0); // graphics mode
        content.put_u16(0); // opcolor
        content.put_u16(0);
        content.put_u16(0);
        Self::write_box(buf, b"vmhd", &content);
    }

    fn write_dinf(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_dref(&mut content);
        Self::write_box(buf, b"dinf", &content);
    }

    fn write_dref(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 0]); // flags
        content.put_u32(1); // entry count

        // url entry
        let mut url = BytesMut::new();
        url.put_u8(0); // version
        url.put_slice(&[0, 0, 1]); // flags (self-contained)
        Self::write_box(&mut content, b"url ", &url);

        Self::write_box(buf, b"dref", &content);
    }

    fn write_stbl(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_stsd(&mut content);
        // Sample tables stay empty, samples live in fragments
        Self::write_empty_table(&mut content, b"stts");
        Self::write_empty_table(&mut content, b"stsc");
        self.write_stsz(&mut content);
        Self::write_empty_table(&mut content, b"stco");
        Self::write_box(buf, b"stbl", &content);
    }

    fn write_empty_table(buf: &mut BytesMut, box_type: &[u8; 4]) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 0]); // flags
        content.put_u32(0); // entry count
        Self::write_box(buf, box_type, &content);
    }

    fn write_stsd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0); // version
        content.put_slice(&[0, 0, 0]); // flags
        content.put_u32(1); // entry count

        self.write_avc1(&mut content);

        Self::write_box(buf, b"stsd", &content);
    }

    fn write_avc1(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_slice(&[0; 6]); // reserved
        content.put_u16(1); // data reference index
        content.put_u16(0); // pre-defined
        content.put_u16(0); // reserved
        content.put_u32(0); // pre-defined
        content.put_u32(0);
        content.put_u32(0);
        content.put_u16(self.width as u16);
        content.put_u16(self.height as u16);
        content.put_u32(0x00480000); // horiz resolution (72 dpi)
        content.put_u32(0x00480000); // vert resolution (72 dpi)
        content.put_u32(0); // reserved
        content.put_u16(1); // frame count
        content.put_slice(&[0; 32]); // compressor name
        content.put_u16(0x0018); // depth (24-bit color)
        content.put_i16(-1); // pre-defined

        self.write_avcc(&mut content);

        Self::write_box(buf, b"avc1", &content);
    }

    fn write_avcc(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(1); // version
        content.put_u8(self.sps.get(1).copied().unwrap_or(0x42)); // profile
        content.put_u8(self.sps.get(2).copied().unwrap_or(0xE0)); // profile compat
        content.put_u8(self.sps.get(3).copied().unwrap_or(0x1F)); // level
        content.put_u8(0xFF); // length size minus one (3 = 4 bytes)
        content.put_u8(0xE1); // num SPS (1)
        content.put_u16(self.sps.len() as u16);
        content.put_slice(&self.sps);
        content.put_u8(1); // num PPS
        content.put_u16(self.pps.len() as u16);
        content.put_slice(&self.pps);
        Self::write_box(buf, b"avcC", &content);
    }

    fn write_stsz(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0);
        content.put_slice(&[0, 0, 0]);
        content.put_u32(0); // sample size
        content.put_u32(0); // sample count
        Self::write_box(buf, b"stsz", &content);
    }

    fn write_mvex(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        self.write_mehd(&mut content);
        self.write_trex(&mut content);
        Self::write_box(buf, b"mvex", &content);
    }

    fn write_mehd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(1); // version 1 for 64-bit duration
        content.put_slice(&[0, 0, 0]);
        content.put_u64(0); // fragment duration, patched on finish
        Self::write_box(buf, b"mehd", &content);
    }

    fn write_trex(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0);
        content.put_slice(&[0, 0, 0]);
        content.put_u32(1); // track ID
        content.put_u32(1); // default sample description index
        content.put_u32(TICKS_PER_FRAME); // default sample duration
        content.put_u32(0); // default sample size
        content.put_u32(0); // default sample flags
        Self::write_box(buf, b"trex", &content);
    }

    fn write_moof(&self, buf: &mut BytesMut, sample: &Sample, data_offset: u32) {
        let mut content = BytesMut::new();
        self.write_mfhd(&mut content);
        self.write_traf(&mut content, sample, data_offset);
        Self::write_box(buf, b"moof", &content);
    }

    fn write_mfhd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0);
        content.put_slice(&[0, 0, 0]);
        content.put_u32(self.sequence_number);
        Self::write_box(buf, b"mfhd", &content);
    }

    fn write_traf(&self, buf: &mut BytesMut, sample: &Sample, data_offset: u32) {
        let mut content = BytesMut::new();
        self.write_tfhd(&mut content);
        self.write_tfdt(&mut content, sample.decode_time);
        self.write_trun(&mut content, sample, data_offset);
        Self::write_box(buf, b"traf", &content);
    }

    fn write_tfhd(&self, buf: &mut BytesMut) {
        let mut content = BytesMut::new();
        content.put_u8(0);
        content.put_slice(&[0x02, 0x00, 0x20]); // flags: default-base-is-moof + default-sample-flags
        content.put_u32(1); // track ID
        content.put_u32(0x01010000); // default sample flags (non-keyframe)
        Self::write_box(buf, b"tfhd", &content);
    }

    fn write_tfdt(&self, buf: &mut BytesMut, decode_time: u64) {
        let mut content = BytesMut::new();
        content.put_u8(1); // version 1 for 64-bit time
        content.put_slice(&[0, 0, 0]);
        content.put_u64(decode_time);
        Self::write_box(buf, b"tfdt", &content);
    }

    fn write_trun(&self, buf: &mut BytesMut, sample: &Sample, data_offset: u32) {
        let mut content = BytesMut::new();
        content.put_u8(0);
        // flags: data-offset + sample-duration + sample-size + sample-flags
        content.put_slice(&[0x00, 0x07, 0x01]);
        content.put_u32(1); // sample count
        content.put_u32(data_offset); // from moof start to first sample byte

        content.put_u32(sample.duration); // sample duration
        content.put_u32(sample.data.len() as u32); // sample size

        // Sample flags
        if sample.is_keyframe {
            content.put_u32(0x02000000); // depends on nothing (keyframe)
        } else {
            content.put_u32(0x01010000); // depends on I-frame
        }

        Self::write_box(buf, b"trun", &content);
    }

    fn write_mdat(&self, buf: &mut BytesMut, data: &[u8]) {
        let size = 8 + data.len() as u32;
        buf.put_u32(size);
        buf.put_slice(b"mdat");
        buf.put_slice(data);
    }
}
