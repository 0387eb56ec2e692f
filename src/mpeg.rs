//! MPEG audio frame headers and the Xing/Info extension.
//!
//! The tag engine only needs the header: frame sync to find where the audio starts, the bitrate
//! and sampling parameters to estimate durations, and the Xing fields carrying frame/byte counts
//! of VBR files.

use crate::{Error, ErrorKind};
use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// The 11-bit frame sync mask.
const SYNC: u32 = 0xFFE0_0000;

bitflags! {
    /// Announces which fields follow a Xing header.
    pub struct XingHeaderFlags: u32 {
        const FRAMES  = 0x1;
        const BYTES   = 0x2;
        const TOC     = 0x4;
        const QUALITY = 0x8;
    }
}

/// The channel mode of an MPEG audio frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    /// Stereo.
    Stereo,
    /// Joint stereo.
    JointStereo,
    /// Dual channel.
    DualChannel,
    /// Single channel/mono.
    SingleChannel,
    /// The channel mode is unknown.
    Unspecified,
}

/// Bitrates in kbit/s by [mpeg version 1/2][layer 1-3][bitrate index].
static BITRATE_TABLE: [[[u16; 15]; 3]; 2] = [
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

/// A parsed MPEG audio frame header plus the Xing fields, when present.
#[derive(Copy, Clone, Debug, Default)]
pub struct MpegFrame {
    header: u32,
    xing_magic: u32,
    xing_flags: u32,
    xing_frame_count: u32,
    xing_byte_count: u32,
    xing_quality: u32,
}

impl MpegFrame {
    /// Parses the frame header at the current position of `reader` and probes for a Xing/Info
    /// header inside the frame.
    pub fn parse(mut reader: impl Read + Seek) -> crate::Result<MpegFrame> {
        let start = reader.stream_position()?;
        let header = reader.read_u32::<BigEndian>()?;
        if header & SYNC != SYNC {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "frame sync not found",
            ));
        }
        let mut frame = MpegFrame {
            header,
            ..MpegFrame::default()
        };

        // The Xing header sits after the side info, whose size depends on version and mode.
        let mono = frame.channel_mode() == ChannelMode::SingleChannel;
        let side_info = if frame.mpeg_version() == 1.0 {
            if mono {
                17
            } else {
                32
            }
        } else if mono {
            9
        } else {
            17
        };
        reader.seek(SeekFrom::Start(start + 4 + side_info))?;
        let mut probe = MpegFrame {
            xing_magic: reader.read_u32::<BigEndian>().unwrap_or(0),
            ..frame
        };
        if probe.is_xing_header_available() {
            probe.xing_flags = reader.read_u32::<BigEndian>()?;
            if probe.xing_header_flags().contains(XingHeaderFlags::FRAMES) {
                probe.xing_frame_count = reader.read_u32::<BigEndian>()?;
            }
            if probe.xing_header_flags().contains(XingHeaderFlags::BYTES) {
                probe.xing_byte_count = reader.read_u32::<BigEndian>()?;
            }
            if probe.xing_header_flags().contains(XingHeaderFlags::TOC) {
                reader.seek(SeekFrom::Current(100))?;
            }
            if probe
                .xing_header_flags()
                .contains(XingHeaderFlags::QUALITY)
            {
                probe.xing_quality = reader.read_u32::<BigEndian>()?;
            }
            frame = probe;
        }
        Ok(frame)
    }

    /// Whether the header carries a valid frame sync.
    pub fn is_valid(&self) -> bool {
        self.header & SYNC == SYNC
    }

    /// The MPEG version: 1.0, 2.0 or 2.5; 0.0 when invalid.
    pub fn mpeg_version(&self) -> f64 {
        match (self.header >> 19) & 0x3 {
            0 => 2.5,
            2 => 2.0,
            3 => 1.0,
            _ => 0.0,
        }
    }

    /// The layer, 1-3; 0 when invalid.
    pub fn layer(&self) -> u32 {
        match (self.header >> 17) & 0x3 {
            1 => 3,
            2 => 2,
            3 => 1,
            _ => 0,
        }
    }

    /// Whether the frame is protected by a CRC.
    pub fn is_protected_by_crc(&self) -> bool {
        self.header & 0x1_0000 == 0
    }

    /// The bitrate in kbit/s; 0 when unknown or free-form.
    pub fn bitrate(&self) -> u32 {
        let version = self.mpeg_version();
        let layer = self.layer();
        if version == 0.0 || layer == 0 {
            return 0;
        }
        let index = ((self.header >> 12) & 0xF) as usize;
        if index >= 15 {
            return 0;
        }
        let version_index = if version == 1.0 { 0 } else { 1 };
        u32::from(BITRATE_TABLE[version_index][layer as usize - 1][index])
    }

    /// The sampling frequency in Hz; 0 when unknown.
    pub fn sampling_frequency(&self) -> u32 {
        let base = match (self.header >> 10) & 0x3 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return 0,
        };
        match self.mpeg_version() {
            version if version == 1.0 => base,
            version if version == 2.0 => base / 2,
            version if version == 2.5 => base / 4,
            _ => 0,
        }
    }

    /// The padding size in bytes; 4 for layer I, 1 otherwise.
    pub fn padding_size(&self) -> u32 {
        if self.header & 0x200 == 0 {
            0
        } else if self.layer() == 1 {
            4
        } else {
            1
        }
    }

    /// The channel mode.
    pub fn channel_mode(&self) -> ChannelMode {
        if !self.is_valid() {
            return ChannelMode::Unspecified;
        }
        match (self.header >> 6) & 0x3 {
            0 => ChannelMode::Stereo,
            1 => ChannelMode::JointStereo,
            2 => ChannelMode::DualChannel,
            _ => ChannelMode::SingleChannel,
        }
    }

    /// The number of samples per frame.
    pub fn sample_count(&self) -> u32 {
        match self.layer() {
            1 => 384,
            2 => 1152,
            3 if self.mpeg_version() == 1.0 => 1152,
            3 => 576,
            _ => 0,
        }
    }

    /// The frame size in bytes derived from bitrate and sampling frequency; 0 when unknown.
    pub fn size(&self) -> u32 {
        let bitrate = self.bitrate() * 1000;
        let frequency = self.sampling_frequency();
        if bitrate == 0 || frequency == 0 {
            return 0;
        }
        match self.layer() {
            1 => (12 * bitrate / frequency + self.padding_size() / 4) * 4,
            2 | 3 => self.sample_count() / 8 * bitrate / frequency + self.padding_size(),
            _ => 0,
        }
    }

    /// Whether a Xing or Info header is present.
    pub fn is_xing_header_available(&self) -> bool {
        self.xing_magic == u32::from_be_bytes(*b"Xing")
            || self.xing_magic == u32::from_be_bytes(*b"Info")
    }

    /// The Xing header flags.
    pub fn xing_header_flags(&self) -> XingHeaderFlags {
        XingHeaderFlags::from_bits_truncate(self.xing_flags)
    }

    /// Whether the Xing frame count field is present.
    pub fn is_xing_frames_field_present(&self) -> bool {
        self.is_xing_header_available()
            && self.xing_header_flags().contains(XingHeaderFlags::FRAMES)
    }

    /// Whether the Xing byte count field is present.
    pub fn is_xing_bytes_field_present(&self) -> bool {
        self.is_xing_header_available()
            && self.xing_header_flags().contains(XingHeaderFlags::BYTES)
    }

    /// Whether the Xing TOC is present.
    pub fn is_xing_toc_field_present(&self) -> bool {
        self.is_xing_header_available()
            && self.xing_header_flags().contains(XingHeaderFlags::TOC)
    }

    /// Whether the Xing quality indicator is present.
    pub fn is_xing_quality_indicator_field_present(&self) -> bool {
        self.is_xing_header_available()
            && self.xing_header_flags().contains(XingHeaderFlags::QUALITY)
    }

    /// The Xing frame count; 0 when absent.
    pub fn xing_frame_count(&self) -> u32 {
        self.xing_frame_count
    }

    /// The Xing byte count; 0 when absent.
    pub fn xing_byte_count(&self) -> u32 {
        self.xing_byte_count
    }

    /// The Xing quality indicator; 0 when absent.
    pub fn xing_quality_indicator(&self) -> u32 {
        self.xing_quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// MPEG1 layer III, 128 kbit/s, 44100 Hz, no padding, joint stereo.
    const HEADER: u32 = 0xFFFB_9040;

    fn frame_bytes(xing: bool) -> Vec<u8> {
        let mut raw = HEADER.to_be_bytes().to_vec();
        raw.resize(4 + 32, 0);
        if xing {
            raw.extend_from_slice(b"Xing");
            raw.extend_from_slice(&3u32.to_be_bytes()); // frames + bytes
            raw.extend_from_slice(&1234u32.to_be_bytes());
            raw.extend_from_slice(&567_890u32.to_be_bytes());
        }
        raw.resize(417.max(raw.len()), 0);
        raw
    }

    #[test]
    fn header_fields() {
        let frame = MpegFrame::parse(Cursor::new(frame_bytes(false))).unwrap();
        assert!(frame.is_valid());
        assert_eq!(1.0, frame.mpeg_version());
        assert_eq!(3, frame.layer());
        assert_eq!(128, frame.bitrate());
        assert_eq!(44_100, frame.sampling_frequency());
        assert_eq!(ChannelMode::JointStereo, frame.channel_mode());
        assert_eq!(1152, frame.sample_count());
        assert_eq!(417, frame.size());
        assert!(!frame.is_xing_header_available());
    }

    #[test]
    fn xing_fields_follow_their_own_flags() {
        let frame = MpegFrame::parse(Cursor::new(frame_bytes(true))).unwrap();
        assert!(frame.is_xing_header_available());
        assert!(frame.is_xing_frames_field_present());
        assert!(frame.is_xing_bytes_field_present());
        assert!(!frame.is_xing_toc_field_present());
        assert_eq!(1234, frame.xing_frame_count());
        assert_eq!(567_890, frame.xing_byte_count());
    }

    #[test]
    fn bytes_field_presence_tracks_the_bytes_flag() {
        // Only the FRAMES flag set: the bytes field must report absent.
        let mut raw = HEADER.to_be_bytes().to_vec();
        raw.resize(4 + 32, 0);
        raw.extend_from_slice(b"Xing");
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(&99u32.to_be_bytes());
        let frame = MpegFrame::parse(Cursor::new(raw)).unwrap();
        assert!(frame.is_xing_frames_field_present());
        assert!(!frame.is_xing_bytes_field_present());
        assert_eq!(99, frame.xing_frame_count());
        assert_eq!(0, frame.xing_byte_count());
    }

    #[test]
    fn missing_sync_is_invalid_data() {
        let err = MpegFrame::parse(Cursor::new(vec![0u8; 64])).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidData));
    }
}
