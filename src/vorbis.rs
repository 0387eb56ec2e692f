//! Reading and writing Vorbis comments.
//!
//! The same comment layout is used by raw Ogg Vorbis (where it is preceded by a packet type
//! signature and followed by a framing byte), by FLAC `VORBIS_COMMENT` metadata blocks (neither
//! signature nor framing byte) and by Opus. [`VorbisCommentFlags`] selects between these
//! renditions.

use crate::diag::Diagnostics;
use crate::fieldmap::{FieldIdent, FieldMap, TagField};
use crate::flac::PictureBlock;
use crate::tag::{KnownField, Tag, TagType};
use crate::value::{TagValue, TextEncoding};
use crate::{Error, ErrorKind};
use base64::prelude::*;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io;

const SIGNATURE: &[u8; 7] = b"\x03vorbis";
const COVER_KEY: &str = "METADATA_BLOCK_PICTURE";

const PARSE_CONTEXT: &str = "parsing Vorbis comment";
const MAKE_CONTEXT: &str = "making Vorbis comment";

bitflags! {
    /// Controls which parts of the comment layout are expected or produced.
    pub struct VorbisCommentFlags: u8 {
        /// The leading `\x03vorbis` packet signature is absent (FLAC, Opus).
        const NO_SIGNATURE = 0x01;
        /// The trailing framing byte is absent (FLAC, Opus).
        const NO_FRAMING_BYTE = 0x02;
        /// Cover fields are not written; used when the surrounding container stores pictures as
        /// separate blocks (FLAC).
        const NO_COVERS = 0x04;
    }
}

/// A Vorbis comment field identifier.
///
/// Stored verbatim for round-trips, compared ASCII case-insensitively.
#[derive(Clone, Debug, Eq)]
pub struct VorbisIdent(String);

impl VorbisIdent {
    /// Returns the identifier exactly as it appears in the comment.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for VorbisIdent {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl FieldIdent for VorbisIdent {
    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

impl From<&str> for VorbisIdent {
    fn from(s: &str) -> VorbisIdent {
        VorbisIdent(s.to_string())
    }
}

impl From<String> for VorbisIdent {
    fn from(s: String) -> VorbisIdent {
        VorbisIdent(s)
    }
}

impl fmt::Display for VorbisIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single `KEY=value` comment.
#[derive(Clone, Debug)]
pub struct VorbisField {
    ident: VorbisIdent,
    value: TagValue,
    cover_type: u32,
}

impl VorbisField {
    /// Creates a field with the given identifier and value.
    pub fn new(ident: impl Into<VorbisIdent>, value: TagValue) -> VorbisField {
        VorbisField {
            ident: ident.into(),
            value,
            cover_type: 0,
        }
    }

    /// The FLAC picture type of a cover field; meaningless for other fields.
    pub fn cover_type(&self) -> u32 {
        self.cover_type
    }

    /// Sets the FLAC picture type of a cover field.
    pub fn set_cover_type(&mut self, cover_type: u32) {
        self.cover_type = cover_type;
    }
}

impl TagField for VorbisField {
    type Ident = VorbisIdent;

    fn ident(&self) -> &VorbisIdent {
        &self.ident
    }

    fn value(&self) -> &TagValue {
        &self.value
    }

    fn set_value(&mut self, value: TagValue) {
        self.value = value;
    }
}

/// A Vorbis comment.
#[derive(Clone, Debug, Default)]
pub struct VorbisComment {
    vendor: TagValue,
    fields: FieldMap<VorbisField>,
}

impl VorbisComment {
    /// Creates an empty comment with an empty vendor string.
    pub fn new() -> VorbisComment {
        VorbisComment::default()
    }

    /// Returns the vendor string value.
    pub fn vendor(&self) -> &TagValue {
        &self.vendor
    }

    /// Sets the vendor string value.
    pub fn set_vendor(&mut self, vendor: TagValue) {
        self.vendor = vendor;
    }

    /// Raw access to the fields, required for bulk edits such as multiple covers.
    pub fn fields(&self) -> &FieldMap<VorbisField> {
        &self.fields
    }

    /// Mutable raw access to the fields.
    pub fn fields_mut(&mut self) -> &mut FieldMap<VorbisField> {
        &mut self.fields
    }

    /// Returns the comment key used for `field`, if the field is representable.
    pub fn field_id(field: KnownField) -> Option<&'static str> {
        match field {
            KnownField::Title => Some("TITLE"),
            KnownField::Album => Some("ALBUM"),
            KnownField::Artist => Some("ARTIST"),
            KnownField::AlbumArtist => Some("ALBUMARTIST"),
            KnownField::Genre => Some("GENRE"),
            KnownField::Year => Some("DATE"),
            KnownField::Comment => Some("COMMENT"),
            KnownField::TrackPosition => Some("TRACKNUMBER"),
            KnownField::DiskPosition => Some("DISCNUMBER"),
            KnownField::Composer => Some("COMPOSER"),
            KnownField::Encoder => Some("ENCODER"),
            KnownField::EncoderSettings => Some("ENCODER_OPTIONS"),
            KnownField::Bpm => Some("BPM"),
            KnownField::Cover => Some(COVER_KEY),
            KnownField::Rating => Some("RATING"),
            KnownField::Grouping => Some("GROUPING"),
            KnownField::Lyrics => Some("LYRICS"),
            KnownField::Lyricist => Some("LYRICIST"),
            KnownField::RecordLabel => Some("LABEL"),
            KnownField::Performers => Some("PERFORMER"),
            KnownField::Description => None,
        }
    }

    /// Returns the known field a comment key maps to, if any.
    pub fn known_field(ident: &VorbisIdent) -> Option<KnownField> {
        match ident.as_str().to_ascii_uppercase().as_str() {
            "TITLE" => Some(KnownField::Title),
            "ALBUM" => Some(KnownField::Album),
            "ARTIST" => Some(KnownField::Artist),
            "ALBUMARTIST" | "ALBUM_ARTIST" => Some(KnownField::AlbumArtist),
            "GENRE" => Some(KnownField::Genre),
            "DATE" | "YEAR" => Some(KnownField::Year),
            "COMMENT" | "DESCRIPTION" => Some(KnownField::Comment),
            "TRACKNUMBER" => Some(KnownField::TrackPosition),
            "DISCNUMBER" => Some(KnownField::DiskPosition),
            "COMPOSER" => Some(KnownField::Composer),
            "ENCODER" => Some(KnownField::Encoder),
            "ENCODER_OPTIONS" => Some(KnownField::EncoderSettings),
            "BPM" => Some(KnownField::Bpm),
            COVER_KEY => Some(KnownField::Cover),
            "RATING" => Some(KnownField::Rating),
            "GROUPING" => Some(KnownField::Grouping),
            "LYRICS" => Some(KnownField::Lyrics),
            "LYRICIST" => Some(KnownField::Lyricist),
            "LABEL" => Some(KnownField::RecordLabel),
            "PERFORMER" => Some(KnownField::Performers),
            _ => None,
        }
    }

    /// Parses a comment from `reader`, consuming at most `max_size` bytes.
    ///
    /// Truncation is fatal; a missing framing byte is reported as a warning.
    pub fn parse(
        mut reader: impl io::Read,
        max_size: u64,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> crate::Result<VorbisComment> {
        let mut remaining = max_size;
        let mut take = |n: u64| -> crate::Result<u64> {
            if n > remaining {
                return Err(Error::new(
                    ErrorKind::TruncatedData,
                    "Vorbis comment is truncated",
                ));
            }
            remaining -= n;
            Ok(n)
        };

        if !flags.contains(VorbisCommentFlags::NO_SIGNATURE) {
            let mut signature = [0; 7];
            take(7)?;
            reader.read_exact(&mut signature)?;
            if &signature != SIGNATURE {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "Vorbis comment signature is invalid",
                ));
            }
        }

        let mut comment = VorbisComment::new();

        take(4)?;
        let vendor_len = u64::from(reader.read_u32::<LittleEndian>()?);
        let mut vendor = vec![0; take(vendor_len)? as usize];
        reader.read_exact(&mut vendor)?;
        comment.vendor = TagValue::Text {
            data: vendor,
            encoding: TextEncoding::Utf8,
        };

        take(4)?;
        let count = reader.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            take(4)?;
            let len = u64::from(reader.read_u32::<LittleEndian>()?);
            let mut data = vec![0; take(len)? as usize];
            reader.read_exact(&mut data)?;
            let text = match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    diag.warn(PARSE_CONTEXT, "Comment is not valid UTF-8 and is ignored.");
                    continue;
                }
            };
            match text.split_once('=') {
                Some((key, value)) => comment.append_parsed(key, value, diag),
                None => diag.warn(
                    PARSE_CONTEXT,
                    format!("Comment \"{}\" contains no '=' and is ignored.", text),
                ),
            }
        }

        if !flags.contains(VorbisCommentFlags::NO_FRAMING_BYTE) {
            let mut framing = [0; 1];
            if remaining == 0 || reader.read(&mut framing)? == 0 {
                diag.warn(PARSE_CONTEXT, "Framing byte is missing.");
            } else if framing[0] & 0x01 == 0 {
                diag.warn(PARSE_CONTEXT, "Framing bit is not set.");
            }
        }
        Ok(comment)
    }

    fn append_parsed(&mut self, key: &str, value: &str, diag: &mut Diagnostics) {
        let field = if key.eq_ignore_ascii_case(COVER_KEY) {
            match decode_cover(value) {
                Ok((picture, picture_type)) => {
                    let mut field = VorbisField::new(key, TagValue::Picture(picture));
                    field.set_cover_type(picture_type);
                    field
                }
                Err(err) => {
                    diag.warn(
                        PARSE_CONTEXT,
                        format!("Cover cannot be decoded ({}) and is kept verbatim.", err),
                    );
                    VorbisField::new(key, TagValue::text(value))
                }
            }
        } else {
            VorbisField::new(key, TagValue::text(value))
        };
        if field.value.is_empty() {
            diag.info(
                PARSE_CONTEXT,
                format!("Comment \"{}\" is empty.", field.ident),
            );
        }
        self.fields.insert(field);
    }

    /// Writes the comment to `writer` in the rendition selected by `flags`.
    pub fn make(
        &self,
        mut writer: impl io::Write,
        flags: VorbisCommentFlags,
        diag: &mut Diagnostics,
    ) -> crate::Result<()> {
        if !flags.contains(VorbisCommentFlags::NO_SIGNATURE) {
            writer.write_all(SIGNATURE)?;
        }

        let vendor = self.vendor.to_text().unwrap_or_default();
        writer.write_u32::<LittleEndian>(vendor.len() as u32)?;
        writer.write_all(vendor.as_bytes())?;

        let cover_ident = VorbisIdent::from(COVER_KEY);
        let mut comments: Vec<(String, String)> = Vec::with_capacity(self.fields.len());
        for field in self.fields.iter() {
            if field.value.is_empty() {
                continue;
            }
            if field.ident.matches(&cover_ident) {
                if flags.contains(VorbisCommentFlags::NO_COVERS) {
                    continue;
                }
                match field.value.picture() {
                    Some(picture) => comments.push((
                        field.ident.to_string(),
                        encode_cover(picture, field.cover_type),
                    )),
                    // A cover that failed to decode during parse is still carried as text.
                    None => match field.value.to_text() {
                        Ok(text) => comments.push((field.ident.to_string(), text)),
                        Err(_) => diag.warn(
                            MAKE_CONTEXT,
                            "Cover field holds neither a picture nor text and is skipped.",
                        ),
                    },
                }
                continue;
            }
            match field.value.to_text() {
                Ok(text) => comments.push((field.ident.to_string(), text)),
                Err(_) => diag.warn(
                    MAKE_CONTEXT,
                    format!(
                        "Field \"{}\" cannot be rendered as text and is skipped.",
                        field.ident
                    ),
                ),
            }
        }

        writer.write_u32::<LittleEndian>(comments.len() as u32)?;
        for (key, value) in comments {
            writer.write_u32::<LittleEndian>((key.len() + 1 + value.len()) as u32)?;
            writer.write_all(key.as_bytes())?;
            writer.write_all(b"=")?;
            writer.write_all(value.as_bytes())?;
        }

        if !flags.contains(VorbisCommentFlags::NO_FRAMING_BYTE) {
            writer.write_u8(0x01)?;
        }
        Ok(())
    }

    /// Appends all fields of `other`, keeping this comment's vendor unless it is empty.
    ///
    /// Used when a container carries more than one comment block; the blocks are treated as one.
    pub fn merge(&mut self, other: VorbisComment) {
        if self.vendor.is_empty() {
            self.vendor = other.vendor;
        }
        for field in other.fields.iter() {
            self.fields.insert(field.clone());
        }
    }
}

impl Tag for VorbisComment {
    fn tag_type(&self) -> TagType {
        TagType::VorbisComment
    }

    fn value(&self, field: KnownField) -> &TagValue {
        match Self::field_id(field) {
            Some(id) => self.fields.value_of(&VorbisIdent::from(id)),
            None => TagValue::empty(),
        }
    }

    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        if let Some(encoding) = value.encoding() {
            if !self.can_encoding_be_used(encoding) {
                return false;
            }
        }
        match Self::field_id(field) {
            Some(id) => {
                self.fields.set(VorbisField::new(id, value));
                true
            }
            None => false,
        }
    }

    fn has_field(&self, field: KnownField) -> bool {
        !self.value(field).is_empty()
    }

    fn proposed_text_encoding(&self) -> TextEncoding {
        TextEncoding::Utf8
    }

    fn can_encoding_be_used(&self, encoding: TextEncoding) -> bool {
        encoding == TextEncoding::Utf8
    }
}

fn decode_cover(value: &str) -> crate::Result<(crate::value::Picture, u32)> {
    let data = BASE64_STANDARD
        .decode(value)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "cover is not valid base64"))?;
    let block = PictureBlock::parse(io::Cursor::new(&data), data.len() as u64)?;
    Ok((block.picture, block.picture_type))
}

fn encode_cover(picture: &crate::value::Picture, picture_type: u32) -> String {
    let block = PictureBlock {
        picture_type,
        width: 0,
        height: 0,
        depth: 0,
        colors: 0,
        picture: picture.clone(),
    };
    let mut data = Vec::with_capacity(block.required_size() as usize);
    // Writing to a Vec cannot fail.
    block.make(&mut data).unwrap();
    BASE64_STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Picture;

    fn parse_bytes(data: &[u8], flags: VorbisCommentFlags) -> (VorbisComment, Diagnostics) {
        let mut diag = Diagnostics::new();
        let comment =
            VorbisComment::parse(io::Cursor::new(data), data.len() as u64, flags, &mut diag)
                .unwrap();
        (comment, diag)
    }

    #[test]
    fn mapping_is_invertible() {
        let fields = [
            KnownField::Title,
            KnownField::Album,
            KnownField::Artist,
            KnownField::AlbumArtist,
            KnownField::Genre,
            KnownField::Year,
            KnownField::Comment,
            KnownField::TrackPosition,
            KnownField::DiskPosition,
            KnownField::Composer,
            KnownField::Encoder,
            KnownField::EncoderSettings,
            KnownField::Bpm,
            KnownField::Cover,
            KnownField::Rating,
            KnownField::Grouping,
            KnownField::Lyrics,
            KnownField::Lyricist,
            KnownField::RecordLabel,
            KnownField::Performers,
        ];
        for field in fields {
            let id = VorbisComment::field_id(field).unwrap();
            assert_eq!(
                Some(field),
                VorbisComment::known_field(&VorbisIdent::from(id)),
                "{:?}",
                field
            );
        }
    }

    #[test]
    fn round_trip_preserves_order_and_duplicates() {
        let mut comment = VorbisComment::new();
        comment.set_vendor(TagValue::text("Xiph.Org libVorbis I 20150105"));
        comment
            .fields_mut()
            .insert(VorbisField::new("TITLE", TagValue::text("A")));
        comment
            .fields_mut()
            .insert(VorbisField::new("ARTIST", TagValue::text("B")));
        comment
            .fields_mut()
            .insert(VorbisField::new("ARTIST", TagValue::text("C")));
        comment
            .fields_mut()
            .insert(VorbisField::new("ALBUM", TagValue::text("Ω")));

        let flags = VorbisCommentFlags::NO_SIGNATURE | VorbisCommentFlags::NO_FRAMING_BYTE;
        let mut data = Vec::new();
        let mut diag = Diagnostics::new();
        comment.make(&mut data, flags, &mut diag).unwrap();
        assert!(diag.is_empty());

        let (reparsed, diag) = parse_bytes(&data, flags);
        assert!(diag.is_empty());
        assert_eq!(
            "Xiph.Org libVorbis I 20150105",
            reparsed.vendor().to_text().unwrap()
        );
        let order: Vec<&str> = reparsed
            .fields()
            .iter()
            .map(|f| f.ident().as_str())
            .collect();
        assert_eq!(vec!["TITLE", "ARTIST", "ARTIST", "ALBUM"], order);
        let artists: Vec<String> = reparsed
            .fields()
            .all(&VorbisIdent::from("ARTIST"))
            .map(|f| f.value().to_text().unwrap())
            .collect();
        assert_eq!(vec!["B", "C"], artists);
        assert_eq!("Ω", reparsed.value(KnownField::Album).to_text().unwrap());
    }

    #[test]
    fn signature_and_framing_byte() {
        let mut comment = VorbisComment::new();
        comment.set_value(KnownField::Title, TagValue::text("x"));
        let mut data = Vec::new();
        comment
            .make(&mut data, VorbisCommentFlags::empty(), &mut Diagnostics::new())
            .unwrap();
        assert_eq!(b"\x03vorbis", &data[..7]);
        assert_eq!(0x01, *data.last().unwrap());

        let (reparsed, diag) = parse_bytes(&data, VorbisCommentFlags::empty());
        assert!(diag.is_empty());
        assert_eq!("x", reparsed.value(KnownField::Title).to_text().unwrap());

        // Chopping off the framing byte is a warning, not an error.
        let (_, diag) = parse_bytes(&data[..data.len() - 1], VorbisCommentFlags::empty());
        assert_eq!(1, diag.entries().len());
    }

    #[test]
    fn truncated_comment_is_fatal() {
        let mut comment = VorbisComment::new();
        comment.set_value(KnownField::Title, TagValue::text("hello"));
        let mut data = Vec::new();
        let flags = VorbisCommentFlags::NO_SIGNATURE | VorbisCommentFlags::NO_FRAMING_BYTE;
        comment.make(&mut data, flags, &mut Diagnostics::new()).unwrap();

        let mut diag = Diagnostics::new();
        let err = VorbisComment::parse(
            io::Cursor::new(&data),
            data.len() as u64 - 3,
            flags,
            &mut diag,
        )
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TruncatedData));
    }

    #[test]
    fn only_utf8_is_accepted() {
        let mut comment = VorbisComment::new();
        assert!(!comment.can_encoding_be_used(TextEncoding::Latin1));
        assert!(comment.can_encoding_be_used(TextEncoding::Utf8));
        assert!(!comment.set_value(
            KnownField::Title,
            TagValue::text_with_encoding("x", TextEncoding::Utf16LittleEndian)
        ));
        assert!(comment.set_value(KnownField::Title, TagValue::text("x")));
    }

    #[test]
    fn cover_survives_base64_round_trip() {
        let picture = Picture {
            mime_type: "image/png".to_string(),
            description: "front".to_string(),
            data: vec![0x89, b'P', b'N', b'G'],
        };
        let mut comment = VorbisComment::new();
        let mut field = VorbisField::new(COVER_KEY, TagValue::Picture(picture.clone()));
        field.set_cover_type(3);
        comment.fields_mut().insert(field);

        let flags = VorbisCommentFlags::NO_SIGNATURE | VorbisCommentFlags::NO_FRAMING_BYTE;
        let mut data = Vec::new();
        comment.make(&mut data, flags, &mut Diagnostics::new()).unwrap();

        let (reparsed, diag) = parse_bytes(&data, flags);
        assert!(diag.is_empty());
        let field = reparsed
            .fields()
            .first(&VorbisIdent::from(COVER_KEY))
            .unwrap();
        assert_eq!(3, field.cover_type());
        assert_eq!(Some(&picture), field.value().picture());

        // NO_COVERS suppresses the field entirely.
        let mut without = Vec::new();
        comment
            .make(
                &mut without,
                flags | VorbisCommentFlags::NO_COVERS,
                &mut Diagnostics::new(),
            )
            .unwrap();
        let (reparsed, _) = parse_bytes(&without, flags);
        assert!(reparsed.fields().is_empty());
    }
}
