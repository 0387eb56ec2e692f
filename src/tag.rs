//! The format-independent tag surface.
//!
//! Concrete tags (Vorbis comment, MP4, ID3v1/v2, Matroska) compose a [`crate::fieldmap::FieldMap`]
//! and implement the [`Tag`] trait on top of it. The trait is the only part of a tag most callers
//! need: look up or change the value of a well-known field without caring how the format spells
//! its identifier.

use crate::value::{TagValue, TextEncoding};
use std::fmt;

/// The engine's canonical, format-independent field enumeration.
///
/// Each tag format maps a subset of these to its native identifiers. Formats that cannot
/// represent a field reject it in [`Tag::set_value`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KnownField {
    /// The track title.
    Title,
    /// The album name.
    Album,
    /// The track artist.
    Artist,
    /// The album artist.
    AlbumArtist,
    /// The genre, as free text or a standard genre index.
    Genre,
    /// The release year or date.
    Year,
    /// A free-form comment.
    Comment,
    /// The position of the track within the album, possibly with a total.
    TrackPosition,
    /// The position of the disk within the set, possibly with a total.
    DiskPosition,
    /// The composer.
    Composer,
    /// The encoding person or software.
    Encoder,
    /// The settings the encoder was invoked with.
    EncoderSettings,
    /// Beats per minute.
    Bpm,
    /// An embedded cover picture.
    Cover,
    /// A rating.
    Rating,
    /// The grouping the track belongs to.
    Grouping,
    /// A description or subtitle.
    Description,
    /// Unsynchronised lyrics.
    Lyrics,
    /// The lyricist.
    Lyricist,
    /// The record label.
    RecordLabel,
    /// The performers.
    Performers,
}

/// Identifies a concrete tag format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagType {
    /// A Vorbis comment, as used by Ogg Vorbis, FLAC and Opus.
    VorbisComment,
    /// An ID3v1 trailer.
    Id3v1,
    /// An ID3v2 tag.
    Id3v2,
    /// An iTunes-style `ilst` atom in an MP4 file.
    Mp4,
    /// A Matroska `Tags` element.
    Matroska,
}

impl TagType {
    /// Returns a human readable name of the tag format.
    pub fn name(self) -> &'static str {
        match self {
            TagType::VorbisComment => "Vorbis comment",
            TagType::Id3v1 => "ID3v1 tag",
            TagType::Id3v2 => "ID3v2 tag",
            TagType::Mp4 => "MP4/iTunes tag",
            TagType::Matroska => "Matroska tag",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The capability contract every tag format provides.
pub trait Tag {
    /// Returns which format this tag belongs to.
    fn tag_type(&self) -> TagType;

    /// Returns the value of the first field matching `field`, or the shared empty sentinel when
    /// the field is absent.
    fn value(&self, field: KnownField) -> &TagValue;

    /// Replaces the value of the first field matching `field`, inserting a new field if none
    /// exists yet.
    ///
    /// Returns false when the field is not representable in this format or the value declares an
    /// encoding the format cannot store.
    fn set_value(&mut self, field: KnownField, value: TagValue) -> bool;

    /// Returns whether a non-empty value for `field` is present.
    fn has_field(&self, field: KnownField) -> bool {
        !self.value(field).is_empty()
    }

    /// The encoding new text values should be stored in for this format.
    fn proposed_text_encoding(&self) -> TextEncoding;

    /// Returns whether text with the given encoding can be stored without re-encoding.
    fn can_encoding_be_used(&self, encoding: TextEncoding) -> bool {
        encoding == self.proposed_text_encoding()
    }
}
