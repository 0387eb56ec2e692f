//! A library to read and rewrite embedded audio metadata.
//!
//! Supported are Vorbis comments (Ogg Vorbis, FLAC, Opus), the FLAC metadata block chain,
//! iTunes-style MP4 tags, ID3v1 and ID3v2.2-2.4 (MP3, WAV, AIFF) and Matroska tags. All formats
//! share one model: a tag is a multimap of fields keyed by the format's native identifier, every
//! value is a [`TagValue`], and the [`Tag`] trait translates between the format's identifiers
//! and the [`KnownField`] enumeration. Audio data is never re-encoded; rewriting reuses existing
//! padding where the container provides it and otherwise moves the audio payload bit for bit.
//!
//! # Reading and changing a Vorbis comment
//!
//! ```
//! use mediatag::vorbis::{VorbisComment, VorbisCommentFlags};
//! use mediatag::{Diagnostics, KnownField, Tag, TagValue};
//!
//! let mut diag = Diagnostics::new();
//! let mut comment = VorbisComment::new();
//! comment.set_value(KnownField::Title, TagValue::text("Hello"));
//! comment.set_value(KnownField::Artist, TagValue::text("World"));
//!
//! let mut raw = Vec::new();
//! comment
//!     .make(&mut raw, VorbisCommentFlags::empty(), &mut diag)
//!     .unwrap();
//!
//! let reparsed = VorbisComment::parse(
//!     std::io::Cursor::new(&raw),
//!     raw.len() as u64,
//!     VorbisCommentFlags::empty(),
//!     &mut diag,
//! )
//! .unwrap();
//! assert_eq!("Hello", reparsed.value(KnownField::Title).to_text().unwrap());
//! ```
//!
//! # Writing an ID3v2 tag in place
//!
//! ```no_run
//! use mediatag::id3::{self, Id3v2Tag, Version};
//! use mediatag::{Diagnostics, KnownField, Tag, TagValue};
//!
//! let mut file = std::fs::OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .open("music.mp3")
//!     .unwrap();
//! let mut diag = Diagnostics::new();
//! let mut tag = Id3v2Tag::new();
//! tag.set_value(KnownField::Album, TagValue::text("An Album"));
//! id3::write_tag(&mut file, &tag, Version::Id3v24, &mut diag).unwrap();
//! ```
//!
//! Parse and make operations report non-fatal anomalies through [`Diagnostics`] instead of
//! failing; fatal ones surface as [`Error`] with a closed set of [`ErrorKind`]s.

#![warn(missing_docs)]

pub use crate::diag::{Diagnostics, Notification, Severity};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::tag::{KnownField, Tag, TagType};
pub use crate::value::{Picture, TagValue, TextEncoding, Timestamp};

mod diag;
mod error;

/// The RIFF/AIFF chunk walker embedding ID3 tags in WAV and AIFF files.
pub mod chunk;
/// The insertion-ordered field multimap shared by all tag formats.
pub mod fieldmap;
/// The FLAC metadata block chain.
pub mod flac;
/// ID3v1 and ID3v2 tags.
pub mod id3;
/// Matroska tags.
pub mod matroska;
/// MP4 (ISO-BMFF) atoms and iTunes-style tags.
pub mod mp4;
/// MPEG audio frame headers.
pub mod mpeg;
/// Ogg page framing.
pub mod ogg;
/// In-place tag region rewriting.
pub mod storage;
/// The format-independent tag surface.
pub mod tag;
/// The uniform value model.
pub mod value;
/// Vorbis comments.
pub mod vorbis;
