//! The Matroska `Tags` element: `Tag` entries holding `Targets` and `SimpleTag`s.
//!
//! Only the EBML subset needed for tags is implemented: variable-length element ids and sizes,
//! UTF-8 strings and binary payloads. Nested `SimpleTag`s are flattened into the field map.

use crate::diag::Diagnostics;
use crate::fieldmap::{FieldMap, TagField};
use crate::tag::{KnownField, Tag, TagType};
use crate::value::{TagValue, TextEncoding};
use crate::{Error, ErrorKind};
use std::io::{self, Read, Write};

const PARSE_CONTEXT: &str = "parsing Matroska tag";

/// EBML ids of the elements the engine understands, marker bits included.
pub mod element_ids {
    #![allow(missing_docs)]

    pub const TAGS: u32 = 0x1254_C367;
    pub const TAG: u32 = 0x7373;
    pub const TARGETS: u32 = 0x63C0;
    pub const TARGET_TYPE_VALUE: u32 = 0x68CA;
    pub const TARGET_TYPE: u32 = 0x63CA;
    pub const SIMPLE_TAG: u32 = 0x67C8;
    pub const TAG_NAME: u32 = 0x45A3;
    pub const TAG_LANGUAGE: u32 = 0x447A;
    pub const TAG_DEFAULT: u32 = 0x4484;
    pub const TAG_STRING: u32 = 0x4487;
    pub const TAG_BINARY: u32 = 0x4485;
}

/// Reads an element id, keeping its marker bits. Ids are 1 to 4 bytes long.
pub fn read_element_id(mut reader: impl Read) -> crate::Result<u32> {
    let mut first = [0; 1];
    reader.read_exact(&mut first)?;
    let extra = match first[0] {
        b if b & 0x80 != 0 => 0,
        b if b & 0x40 != 0 => 1,
        b if b & 0x20 != 0 => 2,
        b if b & 0x10 != 0 => 3,
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "EBML element id is invalid",
            ))
        }
    };
    let mut id = u32::from(first[0]);
    let mut rest = vec![0; extra];
    reader.read_exact(&mut rest)?;
    for byte in rest {
        id = (id << 8) | u32::from(byte);
    }
    Ok(id)
}

/// Reads an element size, stripping the marker bit. Sizes are 1 to 8 bytes long.
pub fn read_element_size(mut reader: impl Read) -> crate::Result<u64> {
    let mut first = [0; 1];
    reader.read_exact(&mut first)?;
    let leading = first[0].leading_zeros() as usize;
    if leading > 7 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "EBML element size is invalid",
        ));
    }
    let mut size = u64::from(first[0] & (0x7F >> leading));
    let mut rest = vec![0; leading];
    reader.read_exact(&mut rest)?;
    for byte in rest {
        size = (size << 8) | u64::from(byte);
    }
    Ok(size)
}

fn id_bytes(id: u32) -> Vec<u8> {
    let len = (4 - id.leading_zeros() / 8).max(1);
    id.to_be_bytes()[4 - len as usize..].to_vec()
}

fn size_bytes(size: u64) -> Vec<u8> {
    for len in 1..=8u32 {
        // The all-ones pattern is reserved for "unknown size".
        if size < (1u64 << (7 * len)) - 1 {
            let mut out = size.to_be_bytes()[8 - len as usize..].to_vec();
            out[0] |= 0x80 >> (len - 1);
            return out;
        }
    }
    unreachable!("size fits 56 bits")
}

fn write_element(mut writer: impl Write, id: u32, payload: &[u8]) -> crate::Result<()> {
    writer.write_all(&id_bytes(id))?;
    writer.write_all(&size_bytes(payload.len() as u64))?;
    writer.write_all(payload)?;
    Ok(())
}

fn read_uint(payload: &[u8]) -> u64 {
    payload.iter().fold(0, |n, byte| (n << 8) | u64::from(*byte))
}

/// A single `SimpleTag`.
#[derive(Clone, Debug)]
pub struct MatroskaField {
    ident: String,
    value: TagValue,
    language: String,
}

impl MatroskaField {
    /// Creates a field with the given tag name.
    pub fn new(ident: impl Into<String>, value: TagValue) -> MatroskaField {
        MatroskaField {
            ident: ident.into(),
            value,
            language: "und".to_string(),
        }
    }

    /// The `TagLanguage`, `und` when unset.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Sets the `TagLanguage`.
    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }
}

impl TagField for MatroskaField {
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

/// One `Tag` entry of a `Tags` element.
#[derive(Clone, Debug)]
pub struct MatroskaTag {
    fields: FieldMap<MatroskaField>,
    target_type_value: u64,
    target_type: String,
}

impl Default for MatroskaTag {
    fn default() -> MatroskaTag {
        MatroskaTag {
            fields: FieldMap::new(),
            // 50 denotes the album/movie level, the usual home of these fields.
            target_type_value: 50,
            target_type: String::new(),
        }
    }
}

impl MatroskaTag {
    /// Creates an empty tag targeting the album level.
    pub fn new() -> MatroskaTag {
        MatroskaTag::default()
    }

    /// Raw access to the fields.
    pub fn fields(&self) -> &FieldMap<MatroskaField> {
        &self.fields
    }

    /// Mutable raw access to the fields.
    pub fn fields_mut(&mut self) -> &mut FieldMap<MatroskaField> {
        &mut self.fields
    }

    /// The `TargetTypeValue` of this tag.
    pub fn target_type_value(&self) -> u64 {
        self.target_type_value
    }

    /// Returns the tag name used for `field`, if representable.
    pub fn field_id(field: KnownField) -> Option<&'static str> {
        match field {
            KnownField::Title => Some("TITLE"),
            KnownField::Artist => Some("ARTIST"),
            KnownField::Album => Some("ALBUM"),
            KnownField::Genre => Some("GENRE"),
            KnownField::Year => Some("DATE_RELEASED"),
            KnownField::Comment => Some("COMMENT"),
            KnownField::TrackPosition => Some("PART_NUMBER"),
            KnownField::Composer => Some("COMPOSER"),
            KnownField::Encoder => Some("ENCODER"),
            KnownField::EncoderSettings => Some("ENCODER_SETTINGS"),
            KnownField::Bpm => Some("BPM"),
            KnownField::Rating => Some("RATING"),
            KnownField::Description => Some("DESCRIPTION"),
            KnownField::Lyrics => Some("LYRICS"),
            KnownField::Lyricist => Some("LYRICIST"),
            KnownField::RecordLabel => Some("PUBLISHER"),
            KnownField::Performers => Some("PERFORMER"),
            _ => None,
        }
    }

    /// Returns the known field a tag name maps to, if any.
    pub fn known_field(ident: &str) -> Option<KnownField> {
        match ident {
            "TITLE" => Some(KnownField::Title),
            "ARTIST" => Some(KnownField::Artist),
            "ALBUM" => Some(KnownField::Album),
            "GENRE" => Some(KnownField::Genre),
            "DATE_RELEASED" => Some(KnownField::Year),
            "COMMENT" => Some(KnownField::Comment),
            "PART_NUMBER" => Some(KnownField::TrackPosition),
            "COMPOSER" => Some(KnownField::Composer),
            "ENCODER" => Some(KnownField::Encoder),
            "ENCODER_SETTINGS" => Some(KnownField::EncoderSettings),
            "BPM" => Some(KnownField::Bpm),
            "RATING" => Some(KnownField::Rating),
            "DESCRIPTION" => Some(KnownField::Description),
            "LYRICS" => Some(KnownField::Lyrics),
            "LYRICIST" => Some(KnownField::Lyricist),
            "PUBLISHER" => Some(KnownField::RecordLabel),
            "PERFORMER" => Some(KnownField::Performers),
            _ => None,
        }
    }

    /// Parses all `Tag` entries of a `Tags` element body of `size` bytes.
    pub fn parse_tags(
        mut reader: impl Read,
        size: u64,
        diag: &mut Diagnostics,
    ) -> crate::Result<Vec<MatroskaTag>> {
        let mut tags = Vec::new();
        let mut reader = (&mut reader).take(size);
        while reader.limit() > 0 {
            let id = read_element_id(&mut reader)?;
            let element_size = read_element_size(&mut reader)?;
            if id == element_ids::TAG {
                tags.push(MatroskaTag::parse(&mut reader, element_size, diag)?);
            } else {
                io::copy(&mut (&mut reader).take(element_size), &mut io::sink())?;
            }
        }
        Ok(tags)
    }

    /// Parses one `Tag` element body of `size` bytes.
    pub fn parse(
        mut reader: impl Read,
        size: u64,
        diag: &mut Diagnostics,
    ) -> crate::Result<MatroskaTag> {
        let mut tag = MatroskaTag::new();
        let mut reader = (&mut reader).take(size);
        while reader.limit() > 0 {
            let id = read_element_id(&mut reader)?;
            let element_size = read_element_size(&mut reader)?;
            let mut payload = vec![0; element_size as usize];
            reader.read_exact(&mut payload)?;
            match id {
                element_ids::TARGETS => tag.parse_targets(&payload)?,
                element_ids::SIMPLE_TAG => {
                    tag.parse_simple_tag(&payload, false, diag)?;
                }
                _ => {}
            }
        }
        Ok(tag)
    }

    fn parse_targets(&mut self, payload: &[u8]) -> crate::Result<()> {
        let mut reader = io::Cursor::new(payload);
        while (reader.position() as usize) < payload.len() {
            let id = read_element_id(&mut reader)?;
            let element_size = read_element_size(&mut reader)?;
            let mut inner = vec![0; element_size as usize];
            reader.read_exact(&mut inner)?;
            match id {
                element_ids::TARGET_TYPE_VALUE => self.target_type_value = read_uint(&inner),
                element_ids::TARGET_TYPE => {
                    self.target_type = String::from_utf8(inner)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_simple_tag(
        &mut self,
        payload: &[u8],
        nested: bool,
        diag: &mut Diagnostics,
    ) -> crate::Result<()> {
        let mut reader = io::Cursor::new(payload);
        let mut name = String::new();
        let mut language = "und".to_string();
        let mut value = TagValue::Empty;
        let mut children: Vec<Vec<u8>> = Vec::new();
        while (reader.position() as usize) < payload.len() {
            let id = read_element_id(&mut reader)?;
            let element_size = read_element_size(&mut reader)?;
            let mut inner = vec![0; element_size as usize];
            reader.read_exact(&mut inner)?;
            match id {
                element_ids::TAG_NAME => name = String::from_utf8(inner)?,
                element_ids::TAG_LANGUAGE => language = String::from_utf8(inner)?,
                element_ids::TAG_STRING => {
                    value = TagValue::Text {
                        data: inner,
                        encoding: TextEncoding::Utf8,
                    }
                }
                element_ids::TAG_BINARY => value = TagValue::Binary(inner),
                element_ids::SIMPLE_TAG => children.push(inner),
                _ => {}
            }
        }
        if name.is_empty() {
            diag.warn(PARSE_CONTEXT, "SimpleTag without a TagName is ignored.");
        } else {
            let mut field = MatroskaField::new(name, value);
            field.language = language;
            self.fields.insert(field);
        }
        if !children.is_empty() && !nested {
            diag.info(
                PARSE_CONTEXT,
                "Nested SimpleTags are flattened into the field list.",
            );
        }
        for child in children {
            self.parse_simple_tag(&child, true, diag)?;
        }
        Ok(())
    }

    /// Writes this entry as one `Tag` element.
    pub fn make(&self, mut writer: impl Write) -> crate::Result<()> {
        let mut targets = Vec::new();
        let mut value_bytes = self.target_type_value.to_be_bytes().to_vec();
        while value_bytes.len() > 1 && value_bytes[0] == 0 {
            value_bytes.remove(0);
        }
        write_element(&mut targets, element_ids::TARGET_TYPE_VALUE, &value_bytes)?;
        if !self.target_type.is_empty() {
            write_element(
                &mut targets,
                element_ids::TARGET_TYPE,
                self.target_type.as_bytes(),
            )?;
        }

        let mut body = Vec::new();
        write_element(&mut body, element_ids::TARGETS, &targets)?;
        for field in self.fields.iter() {
            if field.value().is_empty() {
                continue;
            }
            let mut simple = Vec::new();
            write_element(&mut simple, element_ids::TAG_NAME, field.ident().as_bytes())?;
            write_element(
                &mut simple,
                element_ids::TAG_LANGUAGE,
                field.language().as_bytes(),
            )?;
            match field.value() {
                TagValue::Binary(data) => {
                    write_element(&mut simple, element_ids::TAG_BINARY, data)?
                }
                value => write_element(
                    &mut simple,
                    element_ids::TAG_STRING,
                    value.to_text()?.as_bytes(),
                )?,
            }
            write_element(&mut body, element_ids::SIMPLE_TAG, &simple)?;
        }
        write_element(&mut writer, element_ids::TAG, &body)
    }

    /// Writes several entries as one `Tags` element.
    pub fn make_tags(mut writer: impl Write, tags: &[MatroskaTag]) -> crate::Result<()> {
        let mut body = Vec::new();
        for tag in tags {
            tag.make(&mut body)?;
        }
        write_element(&mut writer, element_ids::TAGS, &body)
    }
}

impl Tag for MatroskaTag {
    fn tag_type(&self) -> TagType {
        TagType::Matroska
    }

    fn value(&self, field: KnownField) -> &TagValue {
        match Self::field_id(field) {
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
        match Self::field_id(field) {
            Some(id) => {
                self.fields.set(MatroskaField::new(id, value));
                true
            }
            None => false,
        }
    }

    fn proposed_text_encoding(&self) -> TextEncoding {
        TextEncoding::Utf8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vint_round_trip() {
        for (value, expected_len) in [(0u64, 1), (126, 1), (127, 2), (16_382, 2), (16_383, 3)] {
            let bytes = size_bytes(value);
            assert_eq!(expected_len, bytes.len(), "{}", value);
            let read = read_element_size(io::Cursor::new(bytes)).unwrap();
            assert_eq!(value, read);
        }
    }

    #[test]
    fn element_id_lengths() {
        assert_eq!(vec![0xEC], id_bytes(0xEC));
        assert_eq!(vec![0x45, 0xA3], id_bytes(element_ids::TAG_NAME));
        assert_eq!(
            vec![0x12, 0x54, 0xC3, 0x67],
            id_bytes(element_ids::TAGS)
        );
        assert_eq!(
            element_ids::TAGS,
            read_element_id(io::Cursor::new(id_bytes(element_ids::TAGS))).unwrap()
        );
    }

    #[test]
    fn mapping_is_invertible() {
        let fields = [
            KnownField::Title,
            KnownField::Artist,
            KnownField::Album,
            KnownField::Genre,
            KnownField::Year,
            KnownField::Comment,
            KnownField::TrackPosition,
            KnownField::Composer,
            KnownField::Encoder,
            KnownField::EncoderSettings,
            KnownField::Bpm,
            KnownField::Rating,
            KnownField::Description,
            KnownField::Lyrics,
            KnownField::Lyricist,
            KnownField::RecordLabel,
            KnownField::Performers,
        ];
        for field in fields {
            let id = MatroskaTag::field_id(field).unwrap();
            assert_eq!(Some(field), MatroskaTag::known_field(id), "{:?}", field);
        }
    }

    #[test]
    fn tag_round_trip() {
        let mut tag = MatroskaTag::new();
        tag.set_value(KnownField::Title, TagValue::text("A Title"));
        tag.set_value(KnownField::Artist, TagValue::text("An Artist"));
        let mut field = MatroskaField::new("COMMENT", TagValue::text("hello"));
        field.set_language("eng");
        tag.fields_mut().insert(field);

        let mut raw = Vec::new();
        MatroskaTag::make_tags(&mut raw, std::slice::from_ref(&tag)).unwrap();

        let mut reader = io::Cursor::new(&raw);
        let id = read_element_id(&mut reader).unwrap();
        assert_eq!(element_ids::TAGS, id);
        let size = read_element_size(&mut reader).unwrap();
        let mut diag = Diagnostics::new();
        let tags = MatroskaTag::parse_tags(&mut reader, size, &mut diag).unwrap();
        assert!(diag.is_empty(), "{:?}", diag);
        assert_eq!(1, tags.len());
        let reparsed = &tags[0];
        assert_eq!(50, reparsed.target_type_value());
        assert_eq!(
            "A Title",
            reparsed.value(KnownField::Title).to_text().unwrap()
        );
        assert_eq!(
            "hello",
            reparsed.value(KnownField::Comment).to_text().unwrap()
        );
        let comment = reparsed.fields().first(&"COMMENT".to_string()).unwrap();
        assert_eq!("eng", comment.language());
    }

    #[test]
    fn nested_simple_tags_are_flattened() {
        // SimpleTag(ARTIST) containing a nested SimpleTag(PERFORMER).
        let mut nested = Vec::new();
        write_element(&mut nested, element_ids::TAG_NAME, b"PERFORMER").unwrap();
        write_element(&mut nested, element_ids::TAG_STRING, b"Solo").unwrap();
        let mut outer = Vec::new();
        write_element(&mut outer, element_ids::TAG_NAME, b"ARTIST").unwrap();
        write_element(&mut outer, element_ids::TAG_STRING, b"Band").unwrap();
        write_element(&mut outer, element_ids::SIMPLE_TAG, &nested).unwrap();
        let mut body = Vec::new();
        write_element(&mut body, element_ids::SIMPLE_TAG, &outer).unwrap();

        let mut diag = Diagnostics::new();
        let tag = MatroskaTag::parse(io::Cursor::new(&body), body.len() as u64, &mut diag)
            .unwrap();
        assert_eq!("Band", tag.value(KnownField::Artist).to_text().unwrap());
        assert_eq!(
            "Solo",
            tag.value(KnownField::Performers).to_text().unwrap()
        );
        assert_eq!(1, diag.entries().len());
    }
}
