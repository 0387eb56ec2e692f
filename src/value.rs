//! The uniform value model shared by all tag formats.
//!
//! Every field of every tag holds a [`TagValue`]. Text payloads keep the raw bytes together with
//! their declared encoding; decoding only happens when the value is accessed as text. This allows
//! a tag to be copied from one container to another without guessing encodings.

use crate::{Error, ErrorKind};
use std::convert::TryInto;
use std::fmt;
use std::str::FromStr;

/// Text encodings a [`TagValue`] may declare.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// ISO-8859-1, also referred to as Latin-1.
    Latin1,
    /// UTF-8.
    Utf8,
    /// UTF-16 little endian, without a byte order mark.
    Utf16LittleEndian,
    /// UTF-16 big endian, without a byte order mark.
    Utf16BigEndian,
    /// The encoding is not known. Decoded as UTF-8 when valid, as Latin-1 otherwise.
    Unspecified,
}

impl TextEncoding {
    /// Decodes `bytes` according to this encoding.
    pub fn decode(self, bytes: &[u8]) -> crate::Result<String> {
        match self {
            TextEncoding::Latin1 => Ok(string_from_latin1(bytes)),
            TextEncoding::Utf8 => Ok(String::from_utf8(bytes.to_vec())?),
            TextEncoding::Utf16LittleEndian => string_from_utf16(bytes, u16::from_le_bytes),
            TextEncoding::Utf16BigEndian => string_from_utf16(bytes, u16::from_be_bytes),
            TextEncoding::Unspecified => Ok(String::from_utf8(bytes.to_vec())
                .unwrap_or_else(|err| string_from_latin1(err.as_bytes()))),
        }
    }

    /// Encodes `text` according to this encoding.
    ///
    /// Characters outside of Latin-1 are replaced by `?` when encoding to Latin-1.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
                .collect(),
            TextEncoding::Utf8 | TextEncoding::Unspecified => text.as_bytes().to_vec(),
            TextEncoding::Utf16LittleEndian => text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
            TextEncoding::Utf16BigEndian => text
                .encode_utf16()
                .flat_map(|unit| unit.to_be_bytes())
                .collect(),
        }
    }
}

fn string_from_latin1(data: &[u8]) -> String {
    // The ISO 8859-1 code points match the unicode code points, so `b as char` maps correctly.
    data.iter().map(|b| *b as char).collect()
}

fn string_from_utf16(data: &[u8], combine: fn([u8; 2]) -> u16) -> crate::Result<String> {
    if data.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::StringDecoding(data.to_vec()),
            "utf-16 data has an odd number of bytes",
        ));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| combine(pair.try_into().unwrap()))
        .collect();
    String::from_utf16(&units).map_err(|_| {
        Error::new(
            ErrorKind::StringDecoding(data.to_vec()),
            "data is not valid utf-16",
        )
    })
}

/// An embedded picture, e.g. a cover.
///
/// The picture *type* (front cover, back cover, …) is container specific and kept in the extras
/// of the field holding the picture, not here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Picture {
    /// The MIME type of `data`, e.g. `image/jpeg`.
    pub mime_type: String,
    /// A free-form description, possibly empty.
    pub description: String,
    /// The raw image data.
    pub data: Vec<u8>,
}

/// A date and time of reduced precision, the shape used by ID3v2.4 timestamps.
///
/// Valid renditions are `yyyy`, `yyyy-MM`, `yyyy-MM-dd`, `yyyy-MM-ddTHH`, `yyyy-MM-ddTHH:mm` and
/// `yyyy-MM-ddTHH:mm:ss`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    /// The year.
    pub year: i32,
    /// The month, 1-12.
    pub month: Option<u8>,
    /// The day of the month, 1-31.
    pub day: Option<u8>,
    /// The hour, 0-23.
    pub hour: Option<u8>,
    /// The minute, 0-59.
    pub minute: Option<u8>,
    /// The second, 0-59.
    pub second: Option<u8>,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{:02}", month)?;
            if let Some(day) = self.day {
                write!(f, "-{:02}", day)?;
                if let Some(hour) = self.hour {
                    write!(f, "T{:02}", hour)?;
                    if let Some(minute) = self.minute {
                        write!(f, ":{:02}", minute)?;
                        if let Some(second) = self.second {
                            write!(f, ":{:02}", second)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Timestamp> {
        fn component(s: Option<&str>) -> Option<u8> {
            s?.trim().parse().ok().filter(|n| *n < 100)
        }
        let invalid = || Error::new(ErrorKind::InvalidData, "string is not a valid timestamp");

        let s = s.trim();
        let (date, time) = match s.split_once('T') {
            Some((date, time)) => (date, Some(time)),
            None => (s, None),
        };
        let mut date = date.splitn(3, '-');
        let year = date
            .next()
            .and_then(|y| y.trim().parse().ok())
            .ok_or_else(invalid)?;
        let month = component(date.next());
        let day = month.and(component(date.next()));
        let mut time = time.unwrap_or("").splitn(3, ':');
        let hour = day.and(component(time.next()));
        let minute = hour.and(component(time.next()));
        let second = minute.and(component(time.next()));
        Ok(Timestamp {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }
}

/// The value of a tag field.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum TagValue {
    /// No value is present.
    #[default]
    Empty,
    /// Text with its declared encoding. The bytes are stored verbatim; decoding happens on
    /// access.
    Text {
        /// The raw, still encoded text bytes.
        data: Vec<u8>,
        /// The encoding `data` is stored in.
        encoding: TextEncoding,
    },
    /// A plain integer.
    Integer(i32),
    /// An index into the list of standard genres shared with ID3v1.
    StandardGenre(u8),
    /// A date and time.
    Timestamp(Timestamp),
    /// Raw bytes whose interpretation is up to the container.
    Binary(Vec<u8>),
    /// An embedded picture.
    Picture(Picture),
}

/// The process-wide empty sentinel returned by lookups that miss.
static EMPTY: TagValue = TagValue::Empty;

impl TagValue {
    /// Returns a reference to the shared empty value.
    pub fn empty() -> &'static TagValue {
        &EMPTY
    }

    /// Creates a UTF-8 text value.
    pub fn text(text: impl AsRef<str>) -> TagValue {
        TagValue::text_with_encoding(text, TextEncoding::Utf8)
    }

    /// Creates a text value stored in the given encoding.
    pub fn text_with_encoding(text: impl AsRef<str>, encoding: TextEncoding) -> TagValue {
        TagValue::Text {
            data: encoding.encode(text.as_ref()),
            encoding,
        }
    }

    /// Returns true if no meaningful value is present.
    pub fn is_empty(&self) -> bool {
        match self {
            TagValue::Empty => true,
            TagValue::Text { data, .. } => data.is_empty(),
            TagValue::Binary(data) => data.is_empty(),
            TagValue::Picture(picture) => picture.data.is_empty(),
            _ => false,
        }
    }

    /// Returns the declared text encoding, if this is a text value.
    pub fn encoding(&self) -> Option<TextEncoding> {
        match self {
            TagValue::Text { encoding, .. } => Some(*encoding),
            _ => None,
        }
    }

    /// Converts the value to a string.
    ///
    /// Text is decoded according to its declared encoding; integers, genre indices and
    /// timestamps are formatted. Binary values and pictures are not representable as text.
    pub fn to_text(&self) -> crate::Result<String> {
        match self {
            TagValue::Empty => Ok(String::new()),
            TagValue::Text { data, encoding } => encoding.decode(data),
            TagValue::Integer(n) => Ok(n.to_string()),
            TagValue::StandardGenre(index) => Ok(crate::id3::v1::genre_name(*index)
                .map(str::to_string)
                .unwrap_or_else(|| index.to_string())),
            TagValue::Timestamp(timestamp) => Ok(timestamp.to_string()),
            TagValue::Binary(_) | TagValue::Picture(_) => Err(Error::new(
                ErrorKind::InvalidData,
                "binary value cannot be converted to text",
            )),
        }
    }

    /// Converts the value to an integer if it holds one or text that parses as one.
    pub fn to_integer(&self) -> crate::Result<i32> {
        let not_a_number = || Error::new(ErrorKind::InvalidData, "value is not an integer");
        match self {
            TagValue::Integer(n) => Ok(*n),
            TagValue::StandardGenre(index) => Ok(i32::from(*index)),
            TagValue::Text { data, encoding } => encoding
                .decode(data)?
                .trim()
                .parse()
                .map_err(|_| not_a_number()),
            _ => Err(not_a_number()),
        }
    }

    /// Returns the same value with text re-encoded to `encoding`. Non-text values pass through
    /// unchanged.
    pub fn converted_to(&self, encoding: TextEncoding) -> crate::Result<TagValue> {
        match self {
            TagValue::Text {
                data,
                encoding: current,
            } => {
                if *current == encoding {
                    return Ok(self.clone());
                }
                Ok(TagValue::text_with_encoding(current.decode(data)?, encoding))
            }
            other => Ok(other.clone()),
        }
    }

    /// Returns the contained picture, if any.
    pub fn picture(&self) -> Option<&Picture> {
        match self {
            TagValue::Picture(picture) => Some(picture),
            _ => None,
        }
    }
}

impl From<Picture> for TagValue {
    fn from(picture: Picture) -> TagValue {
        TagValue::Picture(picture)
    }
}

impl From<Timestamp> for TagValue {
    fn from(timestamp: Timestamp) -> TagValue {
        TagValue::Timestamp(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_round_trip() {
        let text = "stringþ";
        let bytes = TextEncoding::Latin1.encode(text);
        assert_eq!(b"string\xFE", &bytes[..]);
        assert_eq!(text, TextEncoding::Latin1.decode(&bytes).unwrap());
    }

    #[test]
    fn utf16_round_trip() {
        let text = "Ω mega";
        for encoding in [TextEncoding::Utf16LittleEndian, TextEncoding::Utf16BigEndian] {
            let bytes = encoding.encode(text);
            assert_eq!(text, encoding.decode(&bytes).unwrap());
        }
        assert!(TextEncoding::Utf16BigEndian.decode(&[0x03]).is_err());
    }

    #[test]
    fn value_text_access() {
        let value = TagValue::text_with_encoding("Händel", TextEncoding::Latin1);
        assert_eq!(Some(TextEncoding::Latin1), value.encoding());
        assert_eq!("Händel", value.to_text().unwrap());
        let utf8 = value.converted_to(TextEncoding::Utf8).unwrap();
        assert_eq!(Some(TextEncoding::Utf8), utf8.encoding());
        assert_eq!("Händel", utf8.to_text().unwrap());
    }

    #[test]
    fn value_integer_access() {
        assert_eq!(128, TagValue::Integer(128).to_integer().unwrap());
        assert_eq!(42, TagValue::text(" 42 ").to_integer().unwrap());
        assert!(TagValue::text("x").to_integer().is_err());
        assert!(TagValue::Binary(vec![1]).to_text().is_err());
    }

    #[test]
    fn empty_sentinel() {
        assert!(TagValue::empty().is_empty());
        assert!(TagValue::text("").is_empty());
        assert!(!TagValue::Integer(0).is_empty());
        assert_eq!("", TagValue::empty().to_text().unwrap());
    }

    #[test]
    fn timestamp_parse_and_format() {
        let ts: Timestamp = "2015-03-07T12:30:01".parse().unwrap();
        assert_eq!(2015, ts.year);
        assert_eq!(Some(3), ts.month);
        assert_eq!(Some(7), ts.day);
        assert_eq!(Some(12), ts.hour);
        assert_eq!(Some(30), ts.minute);
        assert_eq!(Some(1), ts.second);
        assert_eq!("2015-03-07T12:30:01", ts.to_string());

        let year_only: Timestamp = "1999".parse().unwrap();
        assert_eq!("1999", year_only.to_string());
        assert_eq!(None, year_only.month);

        assert!("not a date".parse::<Timestamp>().is_err());
    }
}
