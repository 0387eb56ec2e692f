//! The ID3v2 frame codec for tag versions 2.2, 2.3 and 2.4.
//!
//! Frames are decoded into [`Id3v2Field`]s: the frame id (canonicalised to its 4-character
//! spelling), a [`TagValue`] and the frame specific extras such as the `COMM` language or the
//! `APIC` picture type. ID3v2.2 ids are upgraded on read and downgraded on write.

use crate::diag::Diagnostics;
use crate::fieldmap::TagField;
use crate::id3::unsynch;
use crate::id3::Version;
use crate::value::{Picture, TagValue, TextEncoding};
use crate::{Error, ErrorKind};
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use std::io::{Read, Write};

const PARSE_CONTEXT: &str = "parsing ID3v2 frame";
const MAKE_CONTEXT: &str = "making ID3v2 frame";

bitflags! {
    /// Frame status and format flags, stored in the ID3v2.4 bit layout.
    pub struct FrameFlags: u16 {
        const TAG_ALTER_PRESERVATION  = 0x4000;
        const FILE_ALTER_PRESERVATION = 0x2000;
        const READ_ONLY               = 0x1000;
        const GROUPING_IDENTITY       = 0x0040;
        const COMPRESSION             = 0x0008;
        const ENCRYPTION              = 0x0004;
        const UNSYNCHRONISATION       = 0x0002;
        const DATA_LENGTH_INDICATOR   = 0x0001;
    }
}

/// Pairs of ID3v2.2 and ID3v2.3/2.4 frame ids.
static ID_PAIRS: &[(&str, &str)] = &[
    ("TT1", "TIT1"),
    ("TT2", "TIT2"),
    ("TT3", "TIT3"),
    ("TP1", "TPE1"),
    ("TP2", "TPE2"),
    ("TP3", "TPE3"),
    ("TAL", "TALB"),
    ("TCO", "TCON"),
    ("TYE", "TYER"),
    ("TRK", "TRCK"),
    ("TPA", "TPOS"),
    ("TCM", "TCOM"),
    ("TEN", "TENC"),
    ("TSS", "TSSE"),
    ("TBP", "TBPM"),
    ("TPB", "TPUB"),
    ("TXT", "TEXT"),
    ("TXX", "TXXX"),
    ("COM", "COMM"),
    ("ULT", "USLT"),
    ("PIC", "APIC"),
    ("POP", "POPM"),
    ("WXX", "WXXX"),
];

/// Translates an ID3v2.2 frame id to its 4-character equivalent.
pub fn upgrade_id(id: &str) -> Option<&'static str> {
    ID_PAIRS.iter().find(|(v2, _)| *v2 == id).map(|(_, v4)| *v4)
}

/// Translates a 4-character frame id to its ID3v2.2 equivalent.
pub fn downgrade_id(id: &str) -> Option<&'static str> {
    ID_PAIRS.iter().find(|(_, v4)| *v4 == id).map(|(v2, _)| *v2)
}

/// A single decoded frame.
#[derive(Clone, Debug)]
pub struct Id3v2Field {
    ident: String,
    value: TagValue,
    language: Option<[u8; 3]>,
    description: Option<String>,
    picture_type: u8,
    flags: FrameFlags,
}

impl Id3v2Field {
    /// Creates a field with the given canonical (4-character) frame id.
    pub fn new(ident: impl Into<String>, value: TagValue) -> Id3v2Field {
        Id3v2Field {
            ident: ident.into(),
            value,
            language: None,
            description: None,
            picture_type: 0,
            flags: FrameFlags::empty(),
        }
    }

    /// The ISO-639-2 language of a `COMM`/`USLT` frame.
    pub fn language(&self) -> Option<&[u8; 3]> {
        self.language.as_ref()
    }

    /// Sets the language of a `COMM`/`USLT` frame.
    pub fn set_language(&mut self, language: [u8; 3]) {
        self.language = Some(language);
    }

    /// The description of a `COMM`/`USLT`/`TXXX` frame or the email of a `POPM` frame.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Sets the description.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// The picture type byte of an `APIC` frame.
    pub fn picture_type(&self) -> u8 {
        self.picture_type
    }

    /// Sets the picture type byte of an `APIC` frame.
    pub fn set_picture_type(&mut self, picture_type: u8) {
        self.picture_type = picture_type;
    }

    /// The frame flags.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }
}

impl TagField for Id3v2Field {
    type Ident = String;

    fn ident(&self) -> &String {
        &self.ident
    }

    fn value(&self) -> &TagValue {
        &self.value
    }

    fn set_value(&mut self, value: TagValue) {
        self.value = value;
    }
}

/// The result of decoding one frame slot.
#[derive(Debug)]
pub enum DecodedFrame {
    /// Padding or the end of the frame area was reached.
    Padding,
    /// A recognised but unsupported frame was skipped; carries the bytes consumed.
    Skipped(u64),
    /// A frame was decoded; carries the bytes consumed.
    Frame(u64, Id3v2Field),
}

/// Decodes the next frame. For v2.2 and v2.3 the caller is expected to have reversed tag-level
/// unsynchronisation already; v2.4 per-frame unsynchronisation is reversed here.
pub fn decode(
    mut reader: impl Read,
    version: Version,
    diag: &mut Diagnostics,
) -> crate::Result<DecodedFrame> {
    let header_size = match version {
        Version::Id3v22 => 6,
        Version::Id3v23 | Version::Id3v24 => 10,
    };
    let mut header = [0u8; 10];
    let nread = read_up_to(&mut reader, &mut header[..header_size])?;
    if nread < header_size || header[0] == 0 {
        return Ok(DecodedFrame::Padding);
    }

    let id_len = if version == Version::Id3v22 { 3 } else { 4 };
    let id = std::str::from_utf8(&header[..id_len])
        .ok()
        .filter(|id| id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()))
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "frame id is invalid"))?
        .to_string();
    debug!("reading frame {}", id);

    let (size, flags) = match version {
        Version::Id3v22 => (BigEndian::read_u24(&header[3..6]) as u64, FrameFlags::empty()),
        Version::Id3v23 => (
            u64::from(BigEndian::read_u32(&header[4..8])),
            v3_flags(BigEndian::read_u16(&header[8..10])),
        ),
        Version::Id3v24 => (
            u64::from(unsynch::decode_syncsafe(BigEndian::read_u32(&header[4..8]))),
            FrameFlags::from_bits_truncate(BigEndian::read_u16(&header[8..10])),
        ),
    };

    let mut content = vec![0; size as usize];
    reader.read_exact(&mut content)?;
    let consumed = header_size as u64 + size;

    if flags.contains(FrameFlags::ENCRYPTION) {
        diag.warn(
            PARSE_CONTEXT,
            format!("Frame \"{}\" is encrypted and is skipped.", id),
        );
        return Ok(DecodedFrame::Skipped(consumed));
    }
    if flags.contains(FrameFlags::COMPRESSION) {
        diag.warn(
            PARSE_CONTEXT,
            format!("Frame \"{}\" is compressed and is skipped.", id),
        );
        return Ok(DecodedFrame::Skipped(consumed));
    }

    if version == Version::Id3v24 && flags.contains(FrameFlags::UNSYNCHRONISATION) {
        content = unsynch::strip(&content);
    }
    if flags.contains(FrameFlags::DATA_LENGTH_INDICATOR) {
        if content.len() < 4 {
            return Err(Error::new(ErrorKind::TruncatedData, "frame is truncated"));
        }
        content.drain(..4);
    }

    let canonical = if version == Version::Id3v22 {
        upgrade_id(&id).map(str::to_string).unwrap_or_else(|| id.clone())
    } else {
        id.clone()
    };

    let mut field = match parse_content(&canonical, &content, version) {
        Ok(field) => field,
        Err(err) => {
            diag.warn(
                PARSE_CONTEXT,
                format!(
                    "Content of frame \"{}\" cannot be parsed ({}); it is kept as binary data.",
                    id, err
                ),
            );
            Id3v2Field::new(canonical, TagValue::Binary(content))
        }
    };
    field.flags = flags;
    Ok(DecodedFrame::Frame(consumed, field))
}

fn read_up_to(mut reader: impl Read, buf: &mut [u8]) -> crate::Result<usize> {
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

fn v3_flags(raw: u16) -> FrameFlags {
    let mut flags = FrameFlags::empty();
    flags.set(FrameFlags::TAG_ALTER_PRESERVATION, raw & 0x8000 != 0);
    flags.set(FrameFlags::FILE_ALTER_PRESERVATION, raw & 0x4000 != 0);
    flags.set(FrameFlags::READ_ONLY, raw & 0x2000 != 0);
    flags.set(FrameFlags::COMPRESSION, raw & 0x0080 != 0);
    flags.set(FrameFlags::ENCRYPTION, raw & 0x0040 != 0);
    flags.set(FrameFlags::GROUPING_IDENTITY, raw & 0x0020 != 0);
    flags
}

fn v3_flag_bits(flags: FrameFlags) -> u16 {
    let mut raw = 0;
    if flags.contains(FrameFlags::TAG_ALTER_PRESERVATION) {
        raw |= 0x8000;
    }
    if flags.contains(FrameFlags::FILE_ALTER_PRESERVATION) {
        raw |= 0x4000;
    }
    if flags.contains(FrameFlags::READ_ONLY) {
        raw |= 0x2000;
    }
    raw
}

/// Text encoding indicator bytes used by text-bearing frames.
mod encoding_byte {
    pub const LATIN1: u8 = 0;
    pub const UTF16_BOM: u8 = 1;
    pub const UTF16_BE: u8 = 2;
    pub const UTF8: u8 = 3;
}

/// Decodes `bytes` according to the encoding indicator, returning the text and the concrete
/// encoding it was stored in.
fn decode_text(enc: u8, bytes: &[u8]) -> crate::Result<(String, TextEncoding)> {
    match enc {
        encoding_byte::LATIN1 => Ok((
            TextEncoding::Latin1.decode(bytes)?,
            TextEncoding::Latin1,
        )),
        encoding_byte::UTF16_BOM => {
            if bytes.starts_with(&[0xFF, 0xFE]) {
                Ok((
                    TextEncoding::Utf16LittleEndian.decode(&bytes[2..])?,
                    TextEncoding::Utf16LittleEndian,
                ))
            } else if bytes.starts_with(&[0xFE, 0xFF]) {
                Ok((
                    TextEncoding::Utf16BigEndian.decode(&bytes[2..])?,
                    TextEncoding::Utf16BigEndian,
                ))
            } else {
                Ok((
                    TextEncoding::Utf16BigEndian.decode(bytes)?,
                    TextEncoding::Utf16BigEndian,
                ))
            }
        }
        encoding_byte::UTF16_BE => Ok((
            TextEncoding::Utf16BigEndian.decode(bytes)?,
            TextEncoding::Utf16BigEndian,
        )),
        encoding_byte::UTF8 => Ok((TextEncoding::Utf8.decode(bytes)?, TextEncoding::Utf8)),
        _ => Err(Error::new(
            ErrorKind::UnsupportedFormat,
            "unknown text encoding indicator",
        )),
    }
}

/// Splits at the encoding's string terminator, returning the head and the rest after it.
fn split_terminated(bytes: &[u8], enc: u8) -> (&[u8], &[u8]) {
    if matches!(enc, encoding_byte::UTF16_BOM | encoding_byte::UTF16_BE) {
        let mut i = 0;
        while i + 1 < bytes.len() {
            if bytes[i] == 0 && bytes[i + 1] == 0 {
                return (&bytes[..i], &bytes[i + 2..]);
            }
            i += 2;
        }
        (bytes, &[])
    } else {
        match bytes.iter().position(|b| *b == 0) {
            Some(i) => (&bytes[..i], &bytes[i + 1..]),
            None => (bytes, &[]),
        }
    }
}

fn strip_trailing_terminator(bytes: &[u8], enc: u8) -> &[u8] {
    if matches!(enc, encoding_byte::UTF16_BOM | encoding_byte::UTF16_BE) {
        if bytes.len() >= 2 && bytes[bytes.len() - 2..] == [0, 0] {
            return &bytes[..bytes.len() - 2];
        }
    } else if bytes.last() == Some(&0) {
        return &bytes[..bytes.len() - 1];
    }
    bytes
}

fn parse_content(
    id: &str,
    content: &[u8],
    version: Version,
) -> crate::Result<Id3v2Field> {
    let truncated = || Error::new(ErrorKind::TruncatedData, "frame content is truncated");

    if id == "TXXX" {
        let (enc, rest) = content.split_first().ok_or_else(truncated)?;
        let (desc, text) = split_terminated(rest, *enc);
        let (desc, _) = decode_text(*enc, desc)?;
        let (text, encoding) = decode_text(*enc, strip_trailing_terminator(text, *enc))?;
        let mut field = Id3v2Field::new(id, TagValue::text_with_encoding(text, encoding));
        field.description = Some(desc);
        return Ok(field);
    }
    match id {
        "COMM" | "USLT" => {
            let (enc, rest) = content.split_first().ok_or_else(truncated)?;
            if rest.len() < 3 {
                return Err(truncated());
            }
            let language: [u8; 3] = rest[..3].try_into().unwrap();
            let (desc, text) = split_terminated(&rest[3..], *enc);
            let (desc, _) = decode_text(*enc, desc)?;
            let (text, encoding) = decode_text(*enc, strip_trailing_terminator(text, *enc))?;
            let mut field = Id3v2Field::new(id, TagValue::text_with_encoding(text, encoding));
            field.language = Some(language);
            field.description = Some(desc);
            Ok(field)
        }
        "APIC" => {
            let (enc, rest) = content.split_first().ok_or_else(truncated)?;
            let (mime, picture_type, desc, data) = if version == Version::Id3v22 {
                // v2.2 `PIC`: a 3-character image format instead of a MIME type.
                if rest.len() < 4 {
                    return Err(truncated());
                }
                let format = &rest[..3];
                let mime = if format.eq_ignore_ascii_case(b"PNG") {
                    "image/png".to_string()
                } else {
                    "image/jpeg".to_string()
                };
                let picture_type = rest[3];
                let (desc, data) = split_terminated(&rest[4..], *enc);
                (mime, picture_type, desc, data)
            } else {
                let (mime, rest) = split_terminated(rest, encoding_byte::LATIN1);
                let mime = TextEncoding::Latin1.decode(mime)?;
                let (picture_type, rest) = rest.split_first().ok_or_else(truncated)?;
                let (desc, data) = split_terminated(rest, *enc);
                (mime, *picture_type, desc, data)
            };
            let (desc, _) = decode_text(*enc, desc)?;
            let mut field = Id3v2Field::new(
                "APIC",
                TagValue::Picture(Picture {
                    mime_type: mime,
                    description: desc,
                    data: data.to_vec(),
                }),
            );
            field.picture_type = picture_type;
            Ok(field)
        }
        "POPM" => {
            let (email, rest) = split_terminated(content, encoding_byte::LATIN1);
            let rating = *rest.first().ok_or_else(truncated)?;
            let mut field = Id3v2Field::new(id, TagValue::Integer(i32::from(rating)));
            field.description = Some(TextEncoding::Latin1.decode(email)?);
            Ok(field)
        }
        "WXXX" => {
            let (enc, rest) = content.split_first().ok_or_else(truncated)?;
            let (desc, link) = split_terminated(rest, *enc);
            let (desc, _) = decode_text(*enc, desc)?;
            let link = TextEncoding::Latin1.decode(strip_trailing_terminator(link, 0))?;
            let mut field = Id3v2Field::new(
                id,
                TagValue::text_with_encoding(link, TextEncoding::Latin1),
            );
            field.description = Some(desc);
            Ok(field)
        }
        id if id.starts_with('T') => {
            let (enc, rest) = content.split_first().ok_or_else(truncated)?;
            let (text, encoding) = decode_text(*enc, strip_trailing_terminator(rest, *enc))?;
            Ok(Id3v2Field::new(
                id,
                TagValue::text_with_encoding(text, encoding),
            ))
        }
        id if id.starts_with('W') => {
            let link = TextEncoding::Latin1.decode(strip_trailing_terminator(content, 0))?;
            Ok(Id3v2Field::new(
                id,
                TagValue::text_with_encoding(link, TextEncoding::Latin1),
            ))
        }
        _ => Ok(Id3v2Field::new(id, TagValue::Binary(content.to_vec()))),
    }
}

/// Encodes a field as one frame, applying per-frame unsynchronisation for v2.4 when requested.
///
/// Returns the number of bytes written; 0 when the field cannot be represented in `version`.
pub fn encode(
    mut writer: impl Write,
    field: &Id3v2Field,
    version: Version,
    unsynchronise: bool,
    diag: &mut Diagnostics,
) -> crate::Result<u64> {
    let on_disk_id: String = match version {
        Version::Id3v22 => match downgrade_id(&field.ident) {
            Some(id) => id.to_string(),
            None if field.ident.len() == 3 => field.ident.clone(),
            None => {
                diag.warn(
                    MAKE_CONTEXT,
                    format!(
                        "Frame \"{}\" has no ID3v2.2 equivalent and is omitted.",
                        field.ident
                    ),
                );
                return Ok(0);
            }
        },
        _ => {
            if field.ident.len() != 4 {
                diag.warn(
                    MAKE_CONTEXT,
                    format!(
                        "Frame \"{}\" has no 4-character id and is omitted.",
                        field.ident
                    ),
                );
                return Ok(0);
            }
            field.ident.clone()
        }
    };

    let mut content = render_content(field, version)?;
    let mut flags = field.flags
        & (FrameFlags::TAG_ALTER_PRESERVATION
            | FrameFlags::FILE_ALTER_PRESERVATION
            | FrameFlags::READ_ONLY);
    if version == Version::Id3v24 && unsynchronise {
        content = unsynch::apply(&content);
        flags |= FrameFlags::UNSYNCHRONISATION;
    }

    match version {
        Version::Id3v22 => {
            writer.write_all(on_disk_id.as_bytes())?;
            let size = content.len() as u32;
            writer.write_all(&size.to_be_bytes()[1..])?;
            writer.write_all(&content)?;
            Ok(6 + content.len() as u64)
        }
        Version::Id3v23 => {
            writer.write_all(on_disk_id.as_bytes())?;
            writer.write_all(&(content.len() as u32).to_be_bytes())?;
            writer.write_all(&v3_flag_bits(flags).to_be_bytes())?;
            writer.write_all(&content)?;
            Ok(10 + content.len() as u64)
        }
        Version::Id3v24 => {
            writer.write_all(on_disk_id.as_bytes())?;
            writer.write_all(&unsynch::encode_syncsafe(content.len() as u32).to_be_bytes())?;
            writer.write_all(&flags.bits().to_be_bytes())?;
            writer.write_all(&content)?;
            Ok(10 + content.len() as u64)
        }
    }
}

/// The text encoding new frames are written with.
fn proposed_encoding(version: Version) -> (u8, TextEncoding) {
    match version {
        Version::Id3v24 => (encoding_byte::UTF8, TextEncoding::Utf8),
        _ => (encoding_byte::UTF16_BOM, TextEncoding::Utf16LittleEndian),
    }
}

fn encode_text_payload(text: &str, enc: u8, encoding: TextEncoding) -> Vec<u8> {
    let mut out = Vec::new();
    if enc == encoding_byte::UTF16_BOM {
        out.extend_from_slice(&[0xFF, 0xFE]);
    }
    out.extend_from_slice(&encoding.encode(text));
    out
}

fn terminator(enc: u8) -> &'static [u8] {
    if matches!(enc, encoding_byte::UTF16_BOM | encoding_byte::UTF16_BE) {
        &[0, 0]
    } else {
        &[0]
    }
}

fn render_content(field: &Id3v2Field, version: Version) -> crate::Result<Vec<u8>> {
    // Binary values pass through unchanged, whatever the frame id.
    if let TagValue::Binary(data) = &field.value {
        return Ok(data.clone());
    }

    let (enc, encoding) = proposed_encoding(version);
    let id = field.ident.as_str();
    let mut out = Vec::new();
    match id {
        "COMM" | "USLT" => {
            out.push(enc);
            out.extend_from_slice(field.language.as_ref().unwrap_or(b"eng"));
            out.extend_from_slice(&encode_text_payload(
                field.description.as_deref().unwrap_or(""),
                enc,
                encoding,
            ));
            out.extend_from_slice(terminator(enc));
            out.extend_from_slice(&encode_text_payload(&field.value.to_text()?, enc, encoding));
        }
        "TXXX" => {
            out.push(enc);
            out.extend_from_slice(&encode_text_payload(
                field.description.as_deref().unwrap_or(""),
                enc,
                encoding,
            ));
            out.extend_from_slice(terminator(enc));
            out.extend_from_slice(&encode_text_payload(&field.value.to_text()?, enc, encoding));
        }
        "APIC" => {
            let picture = field.value.picture().ok_or_else(|| {
                Error::new(ErrorKind::InvalidData, "APIC frame holds no picture")
            })?;
            out.push(enc);
            if version == Version::Id3v22 {
                let format: &[u8; 3] = if picture.mime_type.eq_ignore_ascii_case("image/png") {
                    b"PNG"
                } else {
                    b"JPG"
                };
                out.extend_from_slice(format);
            } else {
                out.extend_from_slice(&TextEncoding::Latin1.encode(&picture.mime_type));
                out.push(0);
            }
            out.push(field.picture_type);
            out.extend_from_slice(&encode_text_payload(&picture.description, enc, encoding));
            out.extend_from_slice(terminator(enc));
            out.extend_from_slice(&picture.data);
        }
        "POPM" => {
            out.extend_from_slice(&TextEncoding::Latin1.encode(
                field.description.as_deref().unwrap_or(""),
            ));
            out.push(0);
            let rating = field.value.to_integer().unwrap_or(0).clamp(0, 255) as u8;
            out.push(rating);
        }
        "WXXX" => {
            out.push(enc);
            out.extend_from_slice(&encode_text_payload(
                field.description.as_deref().unwrap_or(""),
                enc,
                encoding,
            ));
            out.extend_from_slice(terminator(enc));
            out.extend_from_slice(&TextEncoding::Latin1.encode(&field.value.to_text()?));
        }
        id if id.starts_with('T') => {
            out.push(enc);
            out.extend_from_slice(&encode_text_payload(&field.value.to_text()?, enc, encoding));
        }
        id if id.starts_with('W') => {
            out.extend_from_slice(&TextEncoding::Latin1.encode(&field.value.to_text()?));
        }
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "field value cannot be rendered into this frame",
            ))
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_one(raw: &[u8], version: Version) -> (u64, Id3v2Field) {
        let mut diag = Diagnostics::new();
        match decode(Cursor::new(raw), version, &mut diag).unwrap() {
            DecodedFrame::Frame(n, field) => (n, field),
            other => panic!("expected a frame, got {:?} ({:?})", other, diag),
        }
    }

    #[test]
    fn v24_comm_frame() {
        // COMM, utf-8, language eng, empty description, text "ripped".
        let mut content = vec![0x03];
        content.extend_from_slice(b"eng");
        content.push(0);
        content.extend_from_slice(b"ripped");
        let mut raw = Vec::new();
        raw.extend_from_slice(b"COMM");
        raw.extend_from_slice(&unsynch::encode_syncsafe(content.len() as u32).to_be_bytes());
        raw.extend_from_slice(&[0, 0]);
        raw.extend_from_slice(&content);

        let (consumed, field) = decode_one(&raw, Version::Id3v24);
        assert_eq!(raw.len() as u64, consumed);
        assert_eq!("COMM", field.ident());
        assert_eq!(Some(b"eng"), field.language());
        assert_eq!(Some(""), field.description());
        assert_eq!("ripped", field.value().to_text().unwrap());

        // Re-encoding reproduces the same frame with a syncsafe size.
        let mut out = Vec::new();
        let written = encode(&mut out, &field, Version::Id3v24, false, &mut Diagnostics::new())
            .unwrap();
        assert_eq!(out.len() as u64, written);
        assert_eq!(raw, out);
    }

    #[test]
    fn v24_text_frame_round_trip() {
        let field = Id3v2Field::new("TIT2", TagValue::text("Hello Ω"));
        let mut raw = Vec::new();
        encode(&mut raw, &field, Version::Id3v24, false, &mut Diagnostics::new()).unwrap();
        let (_, reparsed) = decode_one(&raw, Version::Id3v24);
        assert_eq!("TIT2", reparsed.ident());
        assert_eq!("Hello Ω", reparsed.value().to_text().unwrap());
    }

    #[test]
    fn v23_text_frame_uses_utf16_with_bom() {
        let field = Id3v2Field::new("TALB", TagValue::text("Album"));
        let mut raw = Vec::new();
        encode(&mut raw, &field, Version::Id3v23, false, &mut Diagnostics::new()).unwrap();
        // Header: id + plain size + flags, then encoding byte 1 and a little endian BOM.
        assert_eq!(b"TALB", &raw[0..4]);
        assert_eq!(1, raw[10]);
        assert_eq!(&[0xFF, 0xFE], &raw[11..13]);
        let (_, reparsed) = decode_one(&raw, Version::Id3v23);
        assert_eq!("Album", reparsed.value().to_text().unwrap());
    }

    #[test]
    fn v24_per_frame_unsynchronisation() {
        let field = Id3v2Field::new("TIT2", TagValue::text("ÿ title"));
        let mut raw = Vec::new();
        encode(&mut raw, &field, Version::Id3v24, true, &mut Diagnostics::new()).unwrap();
        let (_, reparsed) = decode_one(&raw, Version::Id3v24);
        assert_eq!("ÿ title", reparsed.value().to_text().unwrap());
    }

    #[test]
    fn v22_picture_frame() {
        let mut content = vec![0x00];
        content.extend_from_slice(b"JPG");
        content.push(3);
        content.extend_from_slice(b"cover\0");
        content.extend_from_slice(&[0xFF, 0xD8]);
        let mut raw = Vec::new();
        raw.extend_from_slice(b"PIC");
        raw.extend_from_slice(&(content.len() as u32).to_be_bytes()[1..]);
        raw.extend_from_slice(&content);

        let (_, field) = decode_one(&raw, Version::Id3v22);
        assert_eq!("APIC", field.ident());
        assert_eq!(3, field.picture_type());
        let picture = field.value().picture().unwrap();
        assert_eq!("image/jpeg", picture.mime_type);
        assert_eq!("cover", picture.description);
        assert_eq!(vec![0xFF, 0xD8], picture.data);
    }

    #[test]
    fn encrypted_frame_is_skipped_with_warning() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"TIT2");
        raw.extend_from_slice(&unsynch::encode_syncsafe(4).to_be_bytes());
        raw.extend_from_slice(&FrameFlags::ENCRYPTION.bits().to_be_bytes());
        raw.extend_from_slice(&[1, 2, 3, 4]);
        let mut diag = Diagnostics::new();
        match decode(Cursor::new(&raw), Version::Id3v24, &mut diag).unwrap() {
            DecodedFrame::Skipped(n) => assert_eq!(raw.len() as u64, n),
            other => panic!("expected skip, got {:?}", other),
        }
        assert_eq!(1, diag.entries().len());
    }

    #[test]
    fn padding_ends_frame_area() {
        let mut diag = Diagnostics::new();
        let raw = [0u8; 10];
        assert!(matches!(
            decode(Cursor::new(&raw[..]), Version::Id3v24, &mut diag).unwrap(),
            DecodedFrame::Padding
        ));
        assert!(matches!(
            decode(Cursor::new(&[][..]), Version::Id3v24, &mut diag).unwrap(),
            DecodedFrame::Padding
        ));
    }

    #[test]
    fn id_conversion_table() {
        assert_eq!(Some("TIT2"), upgrade_id("TT2"));
        assert_eq!(Some("TT2"), downgrade_id("TIT2"));
        assert_eq!(None, upgrade_id("XYZ"));
        for (v2, v4) in ID_PAIRS {
            assert_eq!(Some(*v2), downgrade_id(v4));
            assert_eq!(Some(*v4), upgrade_id(v2));
        }
    }
}
