//! ID3 tags: the ID3v2 header/frame area and the ID3v1 trailer.
//!
//! ID3v2 tags are decoded into the same field-map model as every other format. Writing goes
//! through [`Encoder`], either into a plain writer or in place into an existing file region via
//! [`write_tag`], which reuses trailing padding and only moves the audio data when the new tag
//! does not fit.

pub mod frame;
pub mod unsynch;
pub mod v1;

pub use frame::{FrameFlags, Id3v2Field};
pub use v1::Id3v1Tag;

use crate::diag::Diagnostics;
use crate::fieldmap::FieldMap;
use crate::storage::{StorageFile, TagRegion};
use crate::tag::{KnownField, Tag, TagType};
use crate::value::{TagValue, TextEncoding};
use crate::{Error, ErrorKind};
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

const PARSE_CONTEXT: &str = "parsing ID3v2 tag";

/// Denotes the version of an ID3v2 tag.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    /// ID3v2.2
    Id3v22,
    /// ID3v2.3
    Id3v23,
    /// ID3v2.4
    #[default]
    Id3v24,
}

impl Version {
    /// Returns the minor version, e.g. 4 for ID3v2.4.
    pub fn minor(self) -> u8 {
        match self {
            Version::Id3v22 => 2,
            Version::Id3v23 => 3,
            Version::Id3v24 => 4,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID3v2.{}", self.minor())
    }
}

bitflags! {
    struct TagFlags: u8 {
        const UNSYNCHRONISATION = 0x80; // all versions
        const COMPRESSION       = 0x40; // v2.2 only
        const EXTENDED_HEADER   = 0x40; // v2.3+, shares the bit with v2.2 compression
        const EXPERIMENTAL      = 0x20; // v2.3+
        const FOOTER            = 0x10; // v2.4
    }
}

struct Header {
    version: Version,
    flags: TagFlags,
    /// The size announced by the raw header: frame area plus extended header.
    frame_bytes: u32,
    /// The size of the extended header, already consumed by `decode`.
    ext_size: u32,
}

impl Header {
    /// The size of the whole tag on disk: raw header, frame area and footer if announced.
    fn tag_size(&self) -> u64 {
        let footer = if self.version == Version::Id3v24 && self.flags.contains(TagFlags::FOOTER)
        {
            10
        } else {
            0
        };
        10 + u64::from(self.frame_bytes) + footer
    }

    fn decode(mut reader: impl io::Read) -> crate::Result<Header> {
        let mut raw = [0; 10];
        let nread = read_up_to(&mut reader, &mut raw)?;
        if nread < raw.len() || &raw[0..3] != b"ID3" {
            return Err(Error::new(
                ErrorKind::NoDataFound,
                "reader does not contain an ID3v2 tag",
            ));
        }
        let version = match raw[3] {
            2 => Version::Id3v22,
            3 => Version::Id3v23,
            4 => Version::Id3v24,
            _ => {
                return Err(Error::new(
                    ErrorKind::VersionNotSupported,
                    "unsupported ID3v2 tag version",
                ));
            }
        };
        let flags = TagFlags::from_bits(raw[5]).ok_or_else(|| {
            Error::new(ErrorKind::InvalidData, "unknown tag header flags are set")
        })?;
        let frame_bytes = unsynch::decode_syncsafe(BigEndian::read_u32(&raw[6..10]));

        if version == Version::Id3v22 && flags.contains(TagFlags::COMPRESSION) {
            return Err(Error::new(
                ErrorKind::UnsupportedFormat,
                "ID3v2.2 tag compression is not supported",
            ));
        }

        let mut header = Header {
            version,
            flags,
            frame_bytes,
            ext_size: 0,
        };
        // The extended header is recognised and skipped; its size counts towards the frame area.
        if version != Version::Id3v22 && flags.contains(TagFlags::EXTENDED_HEADER) {
            let raw_ext = reader.read_u32::<BigEndian>()?;
            let ext_size = match version {
                Version::Id3v24 => unsynch::decode_syncsafe(raw_ext),
                _ => raw_ext,
            };
            if ext_size < 6 || ext_size > frame_bytes {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "extended header size is implausible",
                ));
            }
            io::copy(
                &mut reader.take(u64::from(ext_size) - 4),
                &mut io::sink(),
            )?;
            header.ext_size = ext_size;
        }
        Ok(header)
    }
}

fn read_up_to(mut reader: impl io::Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let nread = reader.read(&mut buf[filled..])?;
        if nread == 0 {
            break;
        }
        filled += nread;
    }
    Ok(filled)
}

/// An ID3v2 tag.
#[derive(Clone, Debug, Default)]
pub struct Id3v2Tag {
    fields: FieldMap<Id3v2Field>,
    version: Version,
}

impl Id3v2Tag {
    /// Creates an empty ID3v2.4 tag.
    pub fn new() -> Id3v2Tag {
        Id3v2Tag::default()
    }

    /// Creates an empty tag of the given version.
    pub fn with_version(version: Version) -> Id3v2Tag {
        Id3v2Tag {
            version,
            ..Id3v2Tag::default()
        }
    }

    /// The version the tag was read as or will be written as by default.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Raw access to the fields.
    pub fn fields(&self) -> &FieldMap<Id3v2Field> {
        &self.fields
    }

    /// Mutable raw access to the fields.
    pub fn fields_mut(&mut self) -> &mut FieldMap<Id3v2Field> {
        &mut self.fields
    }

    /// Returns the frame id used for `field`, if representable. The year frame depends on the
    /// tag version (`TDRC` since v2.4, `TYER` before).
    pub fn field_id(&self, field: KnownField) -> Option<&'static str> {
        match field {
            KnownField::Title => Some("TIT2"),
            KnownField::Album => Some("TALB"),
            KnownField::Artist => Some("TPE1"),
            KnownField::AlbumArtist => Some("TPE2"),
            KnownField::Genre => Some("TCON"),
            KnownField::Year => match self.version {
                Version::Id3v24 => Some("TDRC"),
                _ => Some("TYER"),
            },
            KnownField::Comment => Some("COMM"),
            KnownField::TrackPosition => Some("TRCK"),
            KnownField::DiskPosition => Some("TPOS"),
            KnownField::Composer => Some("TCOM"),
            KnownField::Encoder => Some("TENC"),
            KnownField::EncoderSettings => Some("TSSE"),
            KnownField::Bpm => Some("TBPM"),
            KnownField::Cover => Some("APIC"),
            KnownField::Rating => Some("POPM"),
            KnownField::Grouping => Some("TIT1"),
            KnownField::Description => Some("TIT3"),
            KnownField::Lyrics => Some("USLT"),
            KnownField::Lyricist => Some("TEXT"),
            KnownField::RecordLabel => Some("TPUB"),
            KnownField::Performers => None,
        }
    }

    /// Returns the known field a frame id maps to, if any.
    pub fn known_field(id: &str) -> Option<KnownField> {
        match id {
            "TIT2" => Some(KnownField::Title),
            "TALB" => Some(KnownField::Album),
            "TPE1" => Some(KnownField::Artist),
            "TPE2" => Some(KnownField::AlbumArtist),
            "TCON" => Some(KnownField::Genre),
            "TDRC" | "TYER" => Some(KnownField::Year),
            "COMM" => Some(KnownField::Comment),
            "TRCK" => Some(KnownField::TrackPosition),
            "TPOS" => Some(KnownField::DiskPosition),
            "TCOM" => Some(KnownField::Composer),
            "TENC" => Some(KnownField::Encoder),
            "TSSE" => Some(KnownField::EncoderSettings),
            "TBPM" => Some(KnownField::Bpm),
            "APIC" => Some(KnownField::Cover),
            "POPM" => Some(KnownField::Rating),
            "TIT1" => Some(KnownField::Grouping),
            "TIT3" => Some(KnownField::Description),
            "USLT" => Some(KnownField::Lyrics),
            "TEXT" => Some(KnownField::Lyricist),
            "TPUB" => Some(KnownField::RecordLabel),
            _ => None,
        }
    }

    /// Decodes a tag from the current position of `reader`.
    pub fn decode(mut reader: impl io::Read, diag: &mut Diagnostics) -> crate::Result<Id3v2Tag> {
        let header = Header::decode(&mut reader)?;
        let mut body = vec![0; (header.frame_bytes - header.ext_size) as usize];
        let nread = read_up_to(&mut reader, &mut body)?;
        body.truncate(nread);

        // v2.2 and v2.3 apply unsynchronisation to the whole frame area; v2.4 per frame.
        if header.version != Version::Id3v24
            && header.flags.contains(TagFlags::UNSYNCHRONISATION)
        {
            body = unsynch::strip(&body);
        }

        let mut tag = Id3v2Tag::with_version(header.version);
        let mut cursor = io::Cursor::new(body);
        loop {
            match frame::decode(&mut cursor, header.version, diag) {
                Ok(frame::DecodedFrame::Padding) => break,
                Ok(frame::DecodedFrame::Skipped(_)) => continue,
                Ok(frame::DecodedFrame::Frame(_, field)) => tag.fields.insert(field),
                Err(err) => {
                    // The frame boundary is lost; the remaining frame area cannot be walked.
                    diag.critical(
                        PARSE_CONTEXT,
                        format!("Frame cannot be parsed ({}); remaining frames are lost.", err),
                    );
                    break;
                }
            }
        }
        Ok(tag)
    }
}

impl Tag for Id3v2Tag {
    fn tag_type(&self) -> TagType {
        TagType::Id3v2
    }

    fn value(&self, field: KnownField) -> &TagValue {
        match self.field_id(field) {
            Some(id) => self.fields.value_of(&id.to_string()),
            None => TagValue::empty(),
        }
    }

    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        if let Some(encoding) = value.encoding() {
            if !self.can_encoding_be_used(encoding) {
                return false;
            }
        }
        match self.field_id(field) {
            Some(id) => {
                self.fields.set(Id3v2Field::new(id, value));
                true
            }
            None => false,
        }
    }

    fn proposed_text_encoding(&self) -> TextEncoding {
        match self.version {
            Version::Id3v24 => TextEncoding::Utf8,
            _ => TextEncoding::Utf16LittleEndian,
        }
    }

    fn can_encoding_be_used(&self, encoding: TextEncoding) -> bool {
        match self.version {
            Version::Id3v24 => true,
            _ => matches!(
                encoding,
                TextEncoding::Latin1 | TextEncoding::Utf16LittleEndian
            ),
        }
    }
}

/// Encodes [`Id3v2Tag`]s with configurable version, unsynchronisation and padding.
#[derive(Clone, Debug)]
pub struct Encoder {
    version: Version,
    unsynchronisation: bool,
    padding: usize,
}

impl Encoder {
    /// Creates an encoder producing an ID3v2.4 tag without unsynchronisation or padding.
    pub fn new() -> Encoder {
        Encoder {
            version: Version::Id3v24,
            unsynchronisation: false,
            padding: 0,
        }
    }

    /// Sets the tag version to write.
    pub fn version(mut self, version: Version) -> Encoder {
        self.version = version;
        self
    }

    /// Enables or disables unsynchronisation. Only useful when very old readers must not
    /// mistake tag bytes for MPEG frame sync.
    pub fn unsynchronisation(mut self, unsynchronisation: bool) -> Encoder {
        self.unsynchronisation = unsynchronisation;
        self
    }

    /// Sets the amount of zero padding written after the frames.
    pub fn padding(mut self, padding: usize) -> Encoder {
        self.padding = padding;
        self
    }

    /// Encodes `tag` to `writer`.
    pub fn encode(
        &self,
        tag: &Id3v2Tag,
        mut writer: impl Write,
        diag: &mut Diagnostics,
    ) -> crate::Result<()> {
        let mut frame_data = Vec::new();
        for field in tag.fields().iter() {
            frame::encode(
                &mut frame_data,
                field,
                self.version,
                self.unsynchronisation,
                diag,
            )?;
        }
        if self.version != Version::Id3v24 && self.unsynchronisation {
            frame_data = unsynch::apply(&frame_data);
        }

        let mut flags = TagFlags::empty();
        flags.set(TagFlags::UNSYNCHRONISATION, self.unsynchronisation);

        writer.write_all(b"ID3")?;
        writer.write_all(&[self.version.minor(), 0, flags.bits()])?;
        let tag_size = frame_data.len() + self.padding;
        writer.write_all(&unsynch::encode_syncsafe(tag_size as u32).to_be_bytes())?;
        writer.write_all(&frame_data)?;
        io::copy(&mut io::repeat(0).take(self.padding as u64), &mut writer)?;
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

/// Locates an ID3v2 tag at the start of `reader`.
///
/// Returns the byte range spanning the tag and any zero padding that follows it, or None when no
/// tag is present.
pub fn locate_tag(mut reader: impl Read + Seek) -> crate::Result<Option<Range<u64>>> {
    let header = match Header::decode(&mut reader) {
        Ok(header) => header,
        Err(Error {
            kind: ErrorKind::NoDataFound,
            ..
        }) => return Ok(None),
        Err(err) => return Err(err),
    };
    let tag_size = header.tag_size();
    reader.seek(SeekFrom::Start(tag_size))?;
    let num_padding = reader
        .bytes()
        .take_while(|rs| rs.as_ref().map(|b| *b == 0x00).unwrap_or(false))
        .count();
    Ok(Some(0..tag_size + num_padding as u64))
}

/// Writes `tag` into the file in place.
///
/// An existing tag region (including its trailing padding) is reused when the encoded tag fits;
/// otherwise the following data is shifted and fresh padding is reserved.
pub fn write_tag<F: StorageFile>(
    mut file: F,
    tag: &Id3v2Tag,
    version: Version,
    diag: &mut Diagnostics,
) -> crate::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let region = locate_tag(&mut file)?.unwrap_or(0..0);
    let mut storage = TagRegion::new(file, region);
    let mut writer = storage.writer()?;
    Encoder::new()
        .version(version)
        .encode(tag, &mut writer, diag)?;
    writer.flush()?;
    Ok(())
}
