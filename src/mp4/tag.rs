//! The iTunes-style `ilst` tag.
//!
//! Each child of `ilst` is keyed by its FourCC and carries a sole `data` child holding a type
//! indicator, a locale and the payload. Freeform `----` atoms are keyed by their `mean` and
//! `name` sub-atoms instead.

use crate::diag::Diagnostics;
use crate::fieldmap::{FieldMap, TagField};
use crate::mp4::atom::{fourcc_to_string, ids, read_data, AtomRef, AtomTree};
use crate::tag::{KnownField, Tag, TagType};
use crate::value::{Picture, TagValue, TextEncoding};
use crate::{Error, ErrorKind};
use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Read, Seek, Write};

const PARSE_CONTEXT: &str = "parsing MP4 tag";
const MAKE_CONTEXT: &str = "making MP4 tag";

/// The `mean` value of iTunes freeform atoms.
pub const ITUNES_MEAN: &str = "com.apple.iTunes";
/// The freeform `name` under which encoder settings are stored.
pub const ENCODER_SETTINGS_NAME: &str = "cdec";

/// FourCCs of the tag fields (children of `ilst`).
pub mod field_ids {
    #![allow(missing_docs)]

    use crate::mp4::atom::fourcc;

    pub const ALBUM: u32 = fourcc(b"\xA9alb");
    pub const ARTIST: u32 = fourcc(b"\xA9ART");
    pub const ALBUM_ARTIST: u32 = fourcc(b"aART");
    pub const COMMENT: u32 = fourcc(b"\xA9cmt");
    pub const YEAR: u32 = fourcc(b"\xA9day");
    pub const TITLE: u32 = fourcc(b"\xA9nam");
    pub const GENRE: u32 = fourcc(b"\xA9gen");
    pub const PRE_DEFINED_GENRE: u32 = fourcc(b"gnre");
    pub const TRACK_POSITION: u32 = fourcc(b"trkn");
    pub const DISK_POSITION: u32 = fourcc(b"disk");
    pub const COMPOSER: u32 = fourcc(b"\xA9wrt");
    pub const ENCODER: u32 = fourcc(b"\xA9too");
    pub const BPM: u32 = fourcc(b"tmpo");
    pub const COVER: u32 = fourcc(b"covr");
    pub const RATING: u32 = fourcc(b"rtng");
    pub const GROUPING: u32 = fourcc(b"\xA9grp");
    pub const DESCRIPTION: u32 = fourcc(b"desc");
    pub const LYRICS: u32 = fourcc(b"\xA9lyr");
    pub const RECORD_LABEL: u32 = fourcc(b"\xA9pub");
    pub const PERFORMERS: u32 = fourcc(b"\xA9prf");
    pub const LYRICIST: u32 = fourcc(b"\xA9swr");
    pub const EXTENDED: u32 = super::ids::EXTENDED;
}

/// Type indicators of `data` atoms.
pub mod data_type {
    #![allow(missing_docs)]

    pub const BINARY: u32 = 0;
    pub const UTF8: u32 = 1;
    pub const UTF16: u32 = 2;
    pub const JPEG: u32 = 13;
    pub const PNG: u32 = 14;
    pub const BE_SIGNED: u32 = 21;
    pub const BE_UNSIGNED: u32 = 22;
}

/// A single `ilst` child.
#[derive(Clone, Debug)]
pub struct Mp4Field {
    ident: u32,
    value: TagValue,
    mean: Option<String>,
    name: Option<String>,
    type_code: Option<u32>,
    locale: u32,
}

impl Mp4Field {
    /// Creates a field keyed by a FourCC.
    pub fn new(ident: u32, value: TagValue) -> Mp4Field {
        Mp4Field {
            ident,
            value,
            mean: None,
            name: None,
            type_code: None,
            locale: 0,
        }
    }

    /// Creates a freeform `----` field keyed by `(mean, name)`.
    pub fn extended(
        mean: impl Into<String>,
        name: impl Into<String>,
        value: TagValue,
    ) -> Mp4Field {
        Mp4Field {
            ident: field_ids::EXTENDED,
            value,
            mean: Some(mean.into()),
            name: Some(name.into()),
            type_code: None,
            locale: 0,
        }
    }

    /// The `mean` of a freeform field.
    pub fn mean(&self) -> Option<&str> {
        self.mean.as_deref()
    }

    /// The `name` of a freeform field.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The raw type indicator the field was parsed with, if any.
    pub fn type_code(&self) -> Option<u32> {
        self.type_code
    }
}

impl TagField for Mp4Field {
    type Ident = u32;

    fn ident(&self) -> &u32 {
        &self.ident
    }

    fn value(&self) -> &TagValue {
        &self.value
    }

    fn set_value(&mut self, value: TagValue) {
        self.value = value;
    }
}

/// The tag stored in `moov.udta.meta.ilst`.
#[derive(Clone, Debug, Default)]
pub struct Mp4Tag {
    fields: FieldMap<Mp4Field>,
    version: String,
}

impl Mp4Tag {
    /// Creates an empty tag.
    pub fn new() -> Mp4Tag {
        Mp4Tag::default()
    }

    /// Raw access to the fields.
    pub fn fields(&self) -> &FieldMap<Mp4Field> {
        &self.fields
    }

    /// Mutable raw access to the fields.
    pub fn fields_mut(&mut self) -> &mut FieldMap<Mp4Field> {
        &mut self.fields
    }

    /// The version reported by the `hdlr` atom, empty when none was found.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the atom id used for `field`, if the field is representable.
    pub fn field_id(field: KnownField) -> Option<u32> {
        use field_ids::*;
        match field {
            KnownField::Album => Some(ALBUM),
            KnownField::Artist => Some(ARTIST),
            KnownField::AlbumArtist => Some(ALBUM_ARTIST),
            KnownField::Comment => Some(COMMENT),
            KnownField::Year => Some(YEAR),
            KnownField::Title => Some(TITLE),
            KnownField::Genre => Some(GENRE),
            KnownField::TrackPosition => Some(TRACK_POSITION),
            KnownField::DiskPosition => Some(DISK_POSITION),
            KnownField::Composer => Some(COMPOSER),
            KnownField::Encoder => Some(ENCODER),
            KnownField::Bpm => Some(BPM),
            KnownField::Cover => Some(COVER),
            KnownField::Rating => Some(RATING),
            KnownField::Grouping => Some(GROUPING),
            KnownField::Description => Some(DESCRIPTION),
            KnownField::Lyrics => Some(LYRICS),
            KnownField::RecordLabel => Some(RECORD_LABEL),
            KnownField::Performers => Some(PERFORMERS),
            KnownField::Lyricist => Some(LYRICIST),
            KnownField::EncoderSettings => Some(EXTENDED),
        }
    }

    /// Returns the known field an atom id maps to, if any.
    pub fn known_field(id: u32) -> Option<KnownField> {
        use field_ids::*;
        match id {
            ALBUM => Some(KnownField::Album),
            ARTIST => Some(KnownField::Artist),
            ALBUM_ARTIST => Some(KnownField::AlbumArtist),
            COMMENT => Some(KnownField::Comment),
            YEAR => Some(KnownField::Year),
            TITLE => Some(KnownField::Title),
            GENRE | PRE_DEFINED_GENRE => Some(KnownField::Genre),
            TRACK_POSITION => Some(KnownField::TrackPosition),
            DISK_POSITION => Some(KnownField::DiskPosition),
            COMPOSER => Some(KnownField::Composer),
            ENCODER => Some(KnownField::Encoder),
            BPM => Some(KnownField::Bpm),
            COVER => Some(KnownField::Cover),
            RATING => Some(KnownField::Rating),
            GROUPING => Some(KnownField::Grouping),
            DESCRIPTION => Some(KnownField::Description),
            LYRICS => Some(KnownField::Lyrics),
            RECORD_LABEL => Some(KnownField::RecordLabel),
            PERFORMERS => Some(KnownField::Performers),
            LYRICIST => Some(KnownField::Lyricist),
            _ => None,
        }
    }

    /// Returns the value of the freeform field with the given `mean` and `name`, or the shared
    /// empty sentinel.
    pub fn extended_value(&self, mean: &str, name: &str) -> &TagValue {
        self.fields
            .all(&field_ids::EXTENDED)
            .find(|f| f.mean() == Some(mean) && f.name() == Some(name))
            .map(|f| f.value())
            .unwrap_or_else(|| TagValue::empty())
    }

    /// Assigns `value` to the freeform field with the given `mean` and `name`, inserting the
    /// field when absent.
    pub fn set_extended_value(&mut self, mean: &str, name: &str, value: TagValue) -> bool {
        let existing = self
            .fields
            .iter_mut()
            .find(|f| *f.ident() == field_ids::EXTENDED
                && f.mean() == Some(mean)
                && f.name() == Some(name));
        match existing {
            Some(field) => field.value = value,
            None => self.fields.insert(Mp4Field::extended(mean, name, value)),
        }
        true
    }

    /// Parses the tag from a `meta` atom.
    pub fn parse(
        mut reader: impl Read + Seek,
        tree: &mut AtomTree,
        meta: AtomRef,
        diag: &mut Diagnostics,
    ) -> crate::Result<Mp4Tag> {
        let mut tag = Mp4Tag::new();

        let hdlr = match tree.child_by_id(&mut reader, meta, ids::HDLR) {
            Ok(hdlr) => hdlr,
            Err(_) => {
                diag.critical(
                    PARSE_CONTEXT,
                    "Unable to parse child atoms of meta atom (stores hdlr and ilst atoms).",
                );
                None
            }
        };
        if let Some(hdlr) = hdlr {
            let data = read_data(&mut reader, tree.get(hdlr))?;
            if data.len() >= 16 {
                if data[0] != 0 {
                    diag.warn(PARSE_CONTEXT, "Version is unknown.");
                }
                if data[1..4] != [0, 0, 0] {
                    diag.warn(PARSE_CONTEXT, "Flags (hdlr atom) aren't set to 0.");
                }
                if data[4..8] != [0, 0, 0, 0] {
                    diag.warn(
                        PARSE_CONTEXT,
                        "Predefined 32-bit integer (hdlr atom) isn't set to 0.",
                    );
                }
                if &data[8..16] != b"mdirappl" {
                    diag.warn(
                        PARSE_CONTEXT,
                        "Handler type (value in hdlr atom) is unknown. Trying to parse meta \
                         information anyhow.",
                    );
                }
                tag.version = data[0].to_string();
            } else {
                diag.warn(PARSE_CONTEXT, "hdlr atom is truncated.");
            }
        }

        let ilst = match tree.child_by_id(&mut reader, meta, ids::ILST) {
            Ok(ilst) => ilst,
            Err(_) => {
                diag.critical(
                    PARSE_CONTEXT,
                    "Unable to parse child atoms of meta atom (stores hdlr and ilst atoms).",
                );
                None
            }
        };
        let ilst = match ilst {
            Some(ilst) => ilst,
            None => {
                diag.warn(
                    PARSE_CONTEXT,
                    "No ilst atom found (stores attached meta information).",
                );
                return Err(Error::new(ErrorKind::NoDataFound, "no MP4 tag found"));
            }
        };

        for child in tree.children(&mut reader, ilst)? {
            match parse_field(&mut reader, tree, child) {
                Ok(field) => tag.fields.insert(field),
                Err(err) => diag.critical(
                    PARSE_CONTEXT,
                    format!(
                        "Unable to parse field \"{}\": {}",
                        fourcc_to_string(tree.get(child).id),
                        err
                    ),
                ),
            }
        }
        Ok(tag)
    }

    /// Prepares making. Snapshots all sizes; the tag must not be mutated between this call and
    /// [`Mp4TagMaker::make`].
    pub fn prepare_making(&self, diag: &mut Diagnostics) -> Mp4TagMaker {
        Mp4TagMaker::new(self, diag)
    }

    /// Writes the `meta` atom holding this tag to `writer`.
    pub fn make(&self, writer: impl Write, diag: &mut Diagnostics) -> crate::Result<()> {
        self.prepare_making(diag).make(writer, diag)
    }
}

impl Tag for Mp4Tag {
    fn tag_type(&self) -> TagType {
        TagType::Mp4
    }

    fn value(&self, field: KnownField) -> &TagValue {
        match field {
            KnownField::Genre => {
                let text = self.fields.value_of(&field_ids::GENRE);
                if !text.is_empty() {
                    text
                } else {
                    self.fields.value_of(&field_ids::PRE_DEFINED_GENRE)
                }
            }
            KnownField::EncoderSettings => {
                self.extended_value(ITUNES_MEAN, ENCODER_SETTINGS_NAME)
            }
            _ => match Self::field_id(field) {
                Some(id) => self.fields.value_of(&id),
                None => TagValue::empty(),
            },
        }
    }

    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        match field {
            // At most one of the two genre atoms may remain; setting one clears the other.
            KnownField::Genre => match value {
                TagValue::StandardGenre(_) => {
                    self.fields.remove(&field_ids::GENRE);
                    self.fields
                        .set(Mp4Field::new(field_ids::PRE_DEFINED_GENRE, value));
                    true
                }
                _ => {
                    self.fields.remove(&field_ids::PRE_DEFINED_GENRE);
                    self.fields.set(Mp4Field::new(field_ids::GENRE, value));
                    true
                }
            },
            KnownField::EncoderSettings => {
                self.set_extended_value(ITUNES_MEAN, ENCODER_SETTINGS_NAME, value)
            }
            _ => match Self::field_id(field) {
                Some(id) => {
                    self.fields.set(Mp4Field::new(id, value));
                    true
                }
                None => false,
            },
        }
    }

    fn has_field(&self, field: KnownField) -> bool {
        match field {
            KnownField::Genre => {
                !self.fields.value_of(&field_ids::GENRE).is_empty()
                    || !self
                        .fields
                        .value_of(&field_ids::PRE_DEFINED_GENRE)
                        .is_empty()
            }
            _ => !self.value(field).is_empty(),
        }
    }

    fn proposed_text_encoding(&self) -> TextEncoding {
        TextEncoding::Utf8
    }

    fn can_encoding_be_used(&self, encoding: TextEncoding) -> bool {
        matches!(encoding, TextEncoding::Utf8 | TextEncoding::Utf16BigEndian)
    }
}

fn parse_field(
    mut reader: impl Read + Seek,
    tree: &mut AtomTree,
    child: AtomRef,
) -> crate::Result<Mp4Field> {
    let id = tree.get(child).id;
    let missing_data = || Error::new(ErrorKind::NoDataFound, "field carries no data atom");

    if id == field_ids::EXTENDED {
        let mean = tree
            .child_by_id(&mut reader, child, ids::MEAN)?
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "extended field has no mean"))?;
        let name = tree
            .child_by_id(&mut reader, child, ids::NAME)?
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "extended field has no name"))?;
        let data = tree
            .child_by_id(&mut reader, child, ids::DATA)?
            .ok_or_else(missing_data)?;
        let (value, type_code, locale) = parse_data_payload(&read_data(&mut reader, tree.get(data))?, id)?;
        let mut field = Mp4Field::extended(
            freeform_string(&read_data(&mut reader, tree.get(mean))?)?,
            freeform_string(&read_data(&mut reader, tree.get(name))?)?,
            value,
        );
        field.type_code = Some(type_code);
        field.locale = locale;
        return Ok(field);
    }

    let data = tree
        .child_by_id(&mut reader, child, ids::DATA)?
        .ok_or_else(missing_data)?;
    let (value, type_code, locale) = parse_data_payload(&read_data(&mut reader, tree.get(data))?, id)?;
    let mut field = Mp4Field::new(id, value);
    field.type_code = Some(type_code);
    field.locale = locale;
    Ok(field)
}

/// `mean` and `name` payloads start with a 4-byte version/flags block followed by UTF-8 text.
fn freeform_string(data: &[u8]) -> crate::Result<String> {
    if data.len() < 4 {
        return Err(Error::new(
            ErrorKind::TruncatedData,
            "freeform sub-atom is truncated",
        ));
    }
    Ok(String::from_utf8(data[4..].to_vec())?)
}

fn parse_data_payload(data: &[u8], atom_id: u32) -> crate::Result<(TagValue, u32, u32)> {
    if data.len() < 8 {
        return Err(Error::new(ErrorKind::TruncatedData, "data atom is truncated"));
    }
    let type_code = u32::from_be_bytes(data[0..4].try_into().unwrap());
    let locale = u32::from_be_bytes(data[4..8].try_into().unwrap());
    let payload = &data[8..];

    let value = match type_code {
        data_type::UTF8 => TagValue::Text {
            data: payload.to_vec(),
            encoding: TextEncoding::Utf8,
        },
        data_type::UTF16 => TagValue::Text {
            data: payload.to_vec(),
            encoding: TextEncoding::Utf16BigEndian,
        },
        data_type::JPEG => TagValue::Picture(Picture {
            mime_type: "image/jpeg".to_string(),
            description: String::new(),
            data: payload.to_vec(),
        }),
        data_type::PNG => TagValue::Picture(Picture {
            mime_type: "image/png".to_string(),
            description: String::new(),
            data: payload.to_vec(),
        }),
        data_type::BE_SIGNED => TagValue::Integer(parse_be_int(payload)?),
        data_type::BE_UNSIGNED => {
            let unsigned = parse_be_uint(payload)?;
            match i32::try_from(unsigned) {
                Ok(n) => TagValue::Integer(n),
                Err(_) => TagValue::Binary(payload.to_vec()),
            }
        }
        _ => match atom_id {
            field_ids::PRE_DEFINED_GENRE if payload.len() >= 2 => {
                let index = u16::from_be_bytes([payload[0], payload[1]]);
                match u8::try_from(index) {
                    Ok(index) => TagValue::StandardGenre(index),
                    Err(_) => TagValue::Binary(payload.to_vec()),
                }
            }
            field_ids::TRACK_POSITION | field_ids::DISK_POSITION if payload.len() >= 6 => {
                let position = u16::from_be_bytes([payload[2], payload[3]]);
                let total = u16::from_be_bytes([payload[4], payload[5]]);
                if total != 0 {
                    TagValue::text(format!("{}/{}", position, total))
                } else {
                    TagValue::text(position.to_string())
                }
            }
            _ => TagValue::Binary(payload.to_vec()),
        },
    };
    Ok((value, type_code, locale))
}

fn parse_be_int(payload: &[u8]) -> crate::Result<i32> {
    let wrong_size = || Error::new(ErrorKind::InvalidData, "integer payload has an odd size");
    Ok(match payload.len() {
        1 => i32::from(payload[0] as i8),
        2 => i32::from(i16::from_be_bytes(payload.try_into().unwrap())),
        4 => i32::from_be_bytes(payload.try_into().unwrap()),
        8 => i64::from_be_bytes(payload.try_into().unwrap())
            .try_into()
            .map_err(|_| wrong_size())?,
        _ => return Err(wrong_size()),
    })
}

fn parse_be_uint(payload: &[u8]) -> crate::Result<u64> {
    let wrong_size = || Error::new(ErrorKind::InvalidData, "integer payload has an odd size");
    Ok(match payload.len() {
        1 => u64::from(payload[0]),
        2 => u64::from(u16::from_be_bytes(payload.try_into().unwrap())),
        4 => u64::from(u32::from_be_bytes(payload.try_into().unwrap())),
        8 => u64::from_be_bytes(payload.try_into().unwrap()),
        _ => return Err(wrong_size()),
    })
}

/// The fixed payload written between the `meta` header and the `ilst` atom: the 4-byte
/// version/flags block plus a `hdlr` atom with handler type `mdirappl`.
const META_HDLR: [u8; 37] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x21, 0x68, 0x64, 0x6C, 0x72, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x6D, 0x64, 0x69, 0x72, 0x61, 0x70, 0x70, 0x6C, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Writes a prepared tag. Obtained through [`Mp4Tag::prepare_making`].
#[derive(Debug)]
pub struct Mp4TagMaker {
    rendered: Vec<Vec<u8>>,
    ilst_size: u64,
    meta_size: u64,
}

impl Mp4TagMaker {
    fn new(tag: &Mp4Tag, diag: &mut Diagnostics) -> Mp4TagMaker {
        // Only one genre atom may be written; the free-text one wins.
        let omit_predefined_genre = tag.fields.contains(&field_ids::PRE_DEFINED_GENRE)
            && tag.fields.contains(&field_ids::GENRE);

        let mut rendered = Vec::with_capacity(tag.fields.len());
        let mut ilst_size = 8u64;
        for field in tag.fields.iter() {
            if field.value().is_empty() {
                continue;
            }
            if omit_predefined_genre && *field.ident() == field_ids::PRE_DEFINED_GENRE {
                continue;
            }
            match render_field(field) {
                Ok(bytes) => {
                    ilst_size += bytes.len() as u64;
                    rendered.push(bytes);
                }
                Err(err) => diag.critical(
                    MAKE_CONTEXT,
                    format!(
                        "Unable to make field \"{}\": {}",
                        fourcc_to_string(*field.ident()),
                        err
                    ),
                ),
            }
        }

        let mut meta_size = 8 + META_HDLR.len() as u64;
        if ilst_size != 8 {
            meta_size += ilst_size;
        }
        Mp4TagMaker {
            rendered,
            ilst_size,
            meta_size,
        }
    }

    /// The total size of the `meta` atom [`Mp4TagMaker::make`] will write.
    pub fn required_size(&self) -> u64 {
        self.meta_size
    }

    /// Writes the `meta` atom.
    pub fn make(&self, mut writer: impl Write, diag: &mut Diagnostics) -> crate::Result<()> {
        writer.write_u32::<BigEndian>(self.meta_size as u32)?;
        writer.write_u32::<BigEndian>(ids::META)?;
        writer.write_all(&META_HDLR)?;
        if self.ilst_size != 8 {
            writer.write_u32::<BigEndian>(self.ilst_size as u32)?;
            writer.write_u32::<BigEndian>(ids::ILST)?;
            for bytes in &self.rendered {
                writer.write_all(bytes)?;
            }
        } else {
            diag.warn(MAKE_CONTEXT, "Tag is empty.");
        }
        Ok(())
    }
}

fn render_field(field: &Mp4Field) -> crate::Result<Vec<u8>> {
    let (type_code, payload) = render_payload(field)?;

    let mut inner = Vec::new();
    if *field.ident() == field_ids::EXTENDED {
        let mean = field
            .mean()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "extended field has no mean"))?;
        let name = field
            .name()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "extended field has no name"))?;
        inner.extend_from_slice(&render_freeform_sub(ids::MEAN, mean));
        inner.extend_from_slice(&render_freeform_sub(ids::NAME, name));
    }
    inner.extend_from_slice(&render_data_atom(type_code, field.locale, &payload));

    let mut out = Vec::with_capacity(8 + inner.len());
    out.extend_from_slice(&(8 + inner.len() as u32).to_be_bytes());
    out.extend_from_slice(&field.ident.to_be_bytes());
    out.extend_from_slice(&inner);
    Ok(out)
}

fn render_freeform_sub(id: u32, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + text.len());
    out.extend_from_slice(&(12 + text.len() as u32).to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(text.as_bytes());
    out
}

fn render_data_atom(type_code: u32, locale: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + payload.len());
    out.extend_from_slice(&(16 + payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&ids::DATA.to_be_bytes());
    out.extend_from_slice(&type_code.to_be_bytes());
    out.extend_from_slice(&locale.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn render_payload(field: &Mp4Field) -> crate::Result<(u32, Vec<u8>)> {
    let id = *field.ident();
    Ok(match field.value() {
        TagValue::Text { .. } | TagValue::Timestamp(_) => {
            let text = field.value().to_text()?;
            match id {
                field_ids::TRACK_POSITION | field_ids::DISK_POSITION => {
                    (data_type::BINARY, render_position(&text, id)?)
                }
                _ => (data_type::UTF8, text.into_bytes()),
            }
        }
        TagValue::Integer(n) => {
            let payload = if let Ok(small) = i16::try_from(*n) {
                small.to_be_bytes().to_vec()
            } else {
                n.to_be_bytes().to_vec()
            };
            (data_type::BE_SIGNED, payload)
        }
        TagValue::StandardGenre(index) => {
            (data_type::BINARY, u16::from(*index).to_be_bytes().to_vec())
        }
        TagValue::Picture(picture) => {
            let type_code = if picture.mime_type.eq_ignore_ascii_case("image/png") {
                data_type::PNG
            } else {
                data_type::JPEG
            };
            (type_code, picture.data.clone())
        }
        TagValue::Binary(data) => (
            field.type_code().unwrap_or(data_type::BINARY),
            data.clone(),
        ),
        TagValue::Empty => (data_type::BINARY, Vec::new()),
    })
}

/// Renders `n` or `n/of` into the 8-byte (trkn) or 6-byte (disk) pair layout.
fn render_position(text: &str, id: u32) -> crate::Result<Vec<u8>> {
    let invalid = || Error::new(ErrorKind::InvalidData, "position is not of the form \"n/of\"");
    let (position, total) = match text.split_once('/') {
        Some((position, total)) => (
            position.trim().parse::<u16>().map_err(|_| invalid())?,
            total.trim().parse::<u16>().map_err(|_| invalid())?,
        ),
        None => (text.trim().parse::<u16>().map_err(|_| invalid())?, 0),
    };
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&[0, 0]);
    payload.extend_from_slice(&position.to_be_bytes());
    payload.extend_from_slice(&total.to_be_bytes());
    if id == field_ids::TRACK_POSITION {
        payload.extend_from_slice(&[0, 0]);
    }
    Ok(payload)
}
