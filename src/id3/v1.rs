//! The ID3v1 trailer: 128 bytes of fixed-width, Latin-1 fields at the end of the file.

use crate::tag::{KnownField, Tag, TagType};
use crate::value::{TagValue, TextEncoding};
use crate::{Error, ErrorKind};
use std::io::{Read, Seek, SeekFrom, Write};

/// The standard genre list shared between ID3v1 genre indices and MP4 `gnre` atoms, including
/// the Winamp extensions.
pub static GENRE_LIST: &[&str] = &[
    "Blues",
    "Classic Rock",
    "Country",
    "Dance",
    "Disco",
    "Funk",
    "Grunge",
    "Hip-Hop",
    "Jazz",
    "Metal",
    "New Age",
    "Oldies",
    "Other",
    "Pop",
    "R&B",
    "Rap",
    "Reggae",
    "Rock",
    "Techno",
    "Industrial",
    "Alternative",
    "Ska",
    "Death Metal",
    "Pranks",
    "Soundtrack",
    "Euro-Techno",
    "Ambient",
    "Trip-Hop",
    "Vocal",
    "Jazz+Funk",
    "Fusion",
    "Trance",
    "Classical",
    "Instrumental",
    "Acid",
    "House",
    "Game",
    "Sound Clip",
    "Gospel",
    "Noise",
    "Alternative Rock",
    "Bass",
    "Soul",
    "Punk",
    "Space",
    "Meditative",
    "Instrumental Pop",
    "Instrumental Rock",
    "Ethnic",
    "Gothic",
    "Darkwave",
    "Techno-Industrial",
    "Electronic",
    "Pop-Folk",
    "Eurodance",
    "Dream",
    "Southern Rock",
    "Comedy",
    "Cult",
    "Gangsta",
    "Top 40",
    "Christian Rap",
    "Pop/Funk",
    "Jungle",
    "Native US",
    "Cabaret",
    "New Wave",
    "Psychadelic",
    "Rave",
    "Showtunes",
    "Trailer",
    "Lo-Fi",
    "Tribal",
    "Acid Punk",
    "Acid Jazz",
    "Polka",
    "Retro",
    "Musical",
    "Rock & Roll",
    "Hard Rock",
    "Folk",
    "Folk-Rock",
    "National Folk",
    "Swing",
    "Fast Fusion",
    "Bebob",
    "Latin",
    "Revival",
    "Celtic",
    "Bluegrass",
    "Avantgarde",
    "Gothic Rock",
    "Progressive Rock",
    "Psychedelic Rock",
    "Symphonic Rock",
    "Slow Rock",
    "Big Band",
    "Chorus",
    "Easy Listening",
    "Acoustic",
    "Humour",
    "Speech",
    "Chanson",
    "Opera",
    "Chamber Music",
    "Sonata",
    "Symphony",
    "Booty Bass",
    "Primus",
    "Porn Groove",
    "Satire",
    "Slow Jam",
    "Club",
    "Tango",
    "Samba",
    "Folklore",
    "Ballad",
    "Power Ballad",
    "Rhytmic Soul",
    "Freestyle",
    "Duet",
    "Punk Rock",
    "Drum Solo",
    "Acapella",
    "Euro-House",
    "Dance Hall",
    "Goa",
    "Drum & Bass",
    "Club-House",
    "Hardcore",
    "Terror",
    "Indie",
    "BritPop",
    "Negerpunk",
    "Polsk Punk",
    "Beat",
    "Christian Gangsta",
    "Heavy Metal",
    "Black Metal",
    "Crossover",
    "Contemporary C",
    "Christian Rock",
    "Merengue",
    "Salsa",
    "Thrash Metal",
    "Anime",
    "JPop",
    "SynthPop",
];

/// Returns the name of a standard genre index, if the index is assigned.
pub fn genre_name(index: u8) -> Option<&'static str> {
    GENRE_LIST.get(usize::from(index)).copied()
}

/// Returns the standard genre index of a genre name, compared case-insensitively.
pub fn genre_index(name: &str) -> Option<u8> {
    GENRE_LIST
        .iter()
        .position(|genre| genre.eq_ignore_ascii_case(name))
        .map(|index| index as u8)
}

/// An ID3v1 tag.
///
/// The format has a fixed set of fields, so they are stored in named slots rather than a field
/// map. Text wider than the slot is truncated when the tag is written.
#[derive(Clone, Debug, Default)]
pub struct Id3v1Tag {
    title: TagValue,
    artist: TagValue,
    album: TagValue,
    year: TagValue,
    comment: TagValue,
    track: TagValue,
    genre: TagValue,
}

impl Id3v1Tag {
    /// Creates an empty tag.
    pub fn new() -> Id3v1Tag {
        Id3v1Tag::default()
    }

    /// Seeks to the end of `reader` and parses the 128-byte trailer.
    pub fn parse(mut reader: impl Read + Seek) -> crate::Result<Id3v1Tag> {
        let len = reader.seek(SeekFrom::End(0))?;
        if len < 128 {
            return Err(Error::new(
                ErrorKind::NoDataFound,
                "file is too small to contain an ID3v1 tag",
            ));
        }
        reader.seek(SeekFrom::End(-128))?;
        let mut raw = [0; 128];
        reader.read_exact(&mut raw)?;
        if &raw[0..3] != b"TAG" {
            return Err(Error::new(ErrorKind::NoDataFound, "no ID3v1 tag found"));
        }

        let mut tag = Id3v1Tag::new();
        tag.title = slot_value(&raw[3..33]);
        tag.artist = slot_value(&raw[33..63]);
        tag.album = slot_value(&raw[63..93]);
        tag.year = slot_value(&raw[93..97]);
        // A zero byte at offset 125 followed by a non-zero byte marks an ID3v1.1 track number.
        if raw[125] == 0 && raw[126] != 0 {
            tag.comment = slot_value(&raw[97..125]);
            tag.track = TagValue::Integer(i32::from(raw[126]));
        } else {
            tag.comment = slot_value(&raw[97..127]);
        }
        if raw[127] != 0xFF {
            tag.genre = TagValue::StandardGenre(raw[127]);
        }
        Ok(tag)
    }

    /// Writes the 128-byte trailer.
    pub fn make(&self, mut writer: impl Write) -> crate::Result<()> {
        let mut raw = [0u8; 128];
        raw[0..3].copy_from_slice(b"TAG");
        fill_slot(&mut raw[3..33], &self.title);
        fill_slot(&mut raw[33..63], &self.artist);
        fill_slot(&mut raw[63..93], &self.album);
        fill_slot(&mut raw[93..97], &self.year);
        match self.track.to_integer() {
            Ok(track @ 1..=255) => {
                fill_slot(&mut raw[97..125], &self.comment);
                raw[126] = track as u8;
            }
            _ => fill_slot(&mut raw[97..127], &self.comment),
        }
        raw[127] = match &self.genre {
            TagValue::StandardGenre(index) => *index,
            TagValue::Text { .. } => self
                .genre
                .to_text()
                .ok()
                .and_then(|name| genre_index(&name))
                .unwrap_or(0xFF),
            _ => 0xFF,
        };
        writer.write_all(&raw)?;
        Ok(())
    }

    /// Removes an ID3v1 trailer from the end of `file` by truncating it.
    ///
    /// Returns whether a trailer was present.
    pub fn remove(file: &mut std::fs::File) -> crate::Result<bool> {
        let len = file.metadata()?.len();
        if len < 128 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-128))?;
        let mut probe = [0; 3];
        file.read_exact(&mut probe)?;
        if &probe != b"TAG" {
            return Ok(false);
        }
        file.set_len(len - 128)?;
        Ok(true)
    }
}

fn slot_value(slot: &[u8]) -> TagValue {
    let end = slot
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(slot.len());
    let trimmed: &[u8] = {
        let mut trimmed = &slot[..end];
        while let [head @ .., b' '] = trimmed {
            trimmed = head;
        }
        trimmed
    };
    if trimmed.is_empty() {
        TagValue::Empty
    } else {
        TagValue::Text {
            data: trimmed.to_vec(),
            encoding: TextEncoding::Latin1,
        }
    }
}

fn fill_slot(slot: &mut [u8], value: &TagValue) {
    let text = match value.to_text() {
        Ok(text) => text,
        Err(_) => return,
    };
    let encoded = TextEncoding::Latin1.encode(&text);
    let n = encoded.len().min(slot.len());
    slot[..n].copy_from_slice(&encoded[..n]);
}

impl Tag for Id3v1Tag {
    fn tag_type(&self) -> TagType {
        TagType::Id3v1
    }

    fn value(&self, field: KnownField) -> &TagValue {
        match field {
            KnownField::Title => &self.title,
            KnownField::Artist => &self.artist,
            KnownField::Album => &self.album,
            KnownField::Year => &self.year,
            KnownField::Comment => &self.comment,
            KnownField::TrackPosition => &self.track,
            KnownField::Genre => &self.genre,
            _ => TagValue::empty(),
        }
    }

    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool {
        let slot = match field {
            KnownField::Title => &mut self.title,
            KnownField::Artist => &mut self.artist,
            KnownField::Album => &mut self.album,
            KnownField::Year => &mut self.year,
            KnownField::Comment => &mut self.comment,
            KnownField::TrackPosition => &mut self.track,
            KnownField::Genre => &mut self.genre,
            _ => return false,
        };
        *slot = value;
        true
    }

    fn proposed_text_encoding(&self) -> TextEncoding {
        TextEncoding::Latin1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn genre_list_lookup() {
        assert_eq!(Some("Blues"), genre_name(0));
        assert_eq!(Some("Trance"), genre_name(31));
        assert_eq!(None, genre_name(250));
        assert_eq!(Some(31), genre_index("trance"));
        assert_eq!(None, genre_index("Not a genre"));
    }

    #[test]
    fn round_trip_with_track() {
        let mut tag = Id3v1Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("Title"));
        tag.set_value(KnownField::Artist, TagValue::text("Artist"));
        tag.set_value(KnownField::Album, TagValue::text("Album"));
        tag.set_value(KnownField::Year, TagValue::text("2017"));
        tag.set_value(KnownField::Comment, TagValue::text("Comment"));
        tag.set_value(KnownField::TrackPosition, TagValue::Integer(7));
        tag.set_value(KnownField::Genre, TagValue::StandardGenre(31));

        let mut raw = Vec::new();
        tag.make(&mut raw).unwrap();
        assert_eq!(128, raw.len());

        let reparsed = Id3v1Tag::parse(Cursor::new(raw)).unwrap();
        assert_eq!("Title", reparsed.value(KnownField::Title).to_text().unwrap());
        assert_eq!("2017", reparsed.value(KnownField::Year).to_text().unwrap());
        assert_eq!(
            7,
            reparsed
                .value(KnownField::TrackPosition)
                .to_integer()
                .unwrap()
        );
        assert_eq!(
            TagValue::StandardGenre(31),
            *reparsed.value(KnownField::Genre)
        );
        assert_eq!(
            "Trance",
            reparsed.value(KnownField::Genre).to_text().unwrap()
        );
    }

    #[test]
    fn long_text_is_truncated_on_make() {
        let mut tag = Id3v1Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("x".repeat(64)));
        let mut raw = Vec::new();
        tag.make(&mut raw).unwrap();
        let reparsed = Id3v1Tag::parse(Cursor::new(raw)).unwrap();
        assert_eq!(
            "x".repeat(30),
            reparsed.value(KnownField::Title).to_text().unwrap()
        );
    }

    #[test]
    fn missing_tag_reports_no_data() {
        let err = Id3v1Tag::parse(Cursor::new(vec![0u8; 200])).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoDataFound));
        let err = Id3v1Tag::parse(Cursor::new(vec![0u8; 10])).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoDataFound));
    }

    #[test]
    fn unsupported_fields_are_rejected() {
        let mut tag = Id3v1Tag::new();
        assert!(!tag.set_value(KnownField::Lyrics, TagValue::text("la")));
        assert!(!tag.has_field(KnownField::Lyrics));
    }
}
