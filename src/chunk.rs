//! Locating and rewriting the ID3 chunk of RIFF (WAV) and AIFF files.
//!
//! Both formats store a flat sequence of 8-byte-headed chunks below a root chunk; they differ in
//! endianness and in the root tag. The ID3 tag lives in a chunk tagged `ID3 ` (matched case
//! insensitively). Rewriting goes through [`crate::storage::TagRegion`], so a tag that outgrows
//! its chunk shifts the following chunks instead of corrupting them.

use crate::diag::Diagnostics;
use crate::id3::{Encoder, Id3v2Tag, Version};
use crate::storage::{StorageFile, TagRegion};
use crate::{Error, ErrorKind};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{Read, Seek, SeekFrom, Write};

const HEADER_LEN: u64 = 8;

/// The chunk conventions of a concrete container.
pub trait ChunkFormat {
    /// The byte order of chunk sizes.
    type Endianness: ByteOrder;
    /// The tag of the root chunk.
    const ROOT_TAG: [u8; 4];
    /// The format id following the root header, when the container pins one.
    const ROOT_FORMAT: Option<[u8; 4]>;
}

/// `RIFF`/`WAVE`, little endian.
#[derive(Debug)]
pub struct WavFormat;

impl ChunkFormat for WavFormat {
    type Endianness = LittleEndian;
    const ROOT_TAG: [u8; 4] = *b"RIFF";
    const ROOT_FORMAT: Option<[u8; 4]> = Some(*b"WAVE");
}

/// `FORM`, big endian. The format id is not checked; AIFF and AIFC are both common.
#[derive(Debug)]
pub struct AiffFormat;

impl ChunkFormat for AiffFormat {
    type Endianness = BigEndian;
    const ROOT_TAG: [u8; 4] = *b"FORM";
    const ROOT_FORMAT: Option<[u8; 4]> = None;
}

#[derive(Copy, Clone, Debug)]
struct ChunkHeader {
    tag: [u8; 4],
    size: u32,
    /// Absolute offset of the header.
    offset: u64,
}

fn read_root<F: ChunkFormat>(mut reader: impl Read) -> crate::Result<u32> {
    let mut raw = [0; 12];
    reader.read_exact(&mut raw)?;
    if !raw[0..4].eq_ignore_ascii_case(&F::ROOT_TAG) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "root chunk tag does not match the container format",
        ));
    }
    if let Some(format) = F::ROOT_FORMAT {
        if !raw[8..12].eq_ignore_ascii_case(&format) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "root chunk format id does not match the container format",
            ));
        }
    }
    Ok(F::Endianness::read_u32(&raw[4..8]))
}

/// Walks the flat chunk sequence and returns the header of the first `ID3 ` chunk.
fn find_id3<F: ChunkFormat>(
    mut reader: impl Read + Seek,
    end: u64,
) -> crate::Result<Option<ChunkHeader>> {
    let mut offset = 12;
    while offset + HEADER_LEN <= end {
        reader.seek(SeekFrom::Start(offset))?;
        let mut raw = [0; 8];
        reader.read_exact(&mut raw)?;
        let header = ChunkHeader {
            tag: raw[0..4].try_into().unwrap(),
            size: F::Endianness::read_u32(&raw[4..8]),
            offset,
        };
        if header.tag.eq_ignore_ascii_case(b"ID3 ") {
            return Ok(Some(header));
        }
        // Chunk contents are padded to an even length.
        offset += HEADER_LEN + u64::from(header.size) + u64::from(header.size % 2);
    }
    Ok(None)
}

/// Reads the ID3 tag embedded in a chunked file.
pub fn read_tag<F: ChunkFormat>(
    mut reader: impl Read + Seek,
    diag: &mut Diagnostics,
) -> crate::Result<Id3v2Tag> {
    reader.seek(SeekFrom::Start(0))?;
    let root_size = read_root::<F>(&mut reader)?;
    let end = HEADER_LEN + u64::from(root_size);
    let chunk = find_id3::<F>(&mut reader, end)?
        .ok_or_else(|| Error::new(ErrorKind::NoDataFound, "no ID3 chunk found"))?;
    reader.seek(SeekFrom::Start(chunk.offset + HEADER_LEN))?;
    Id3v2Tag::decode(reader.take(u64::from(chunk.size)), diag)
}

/// Writes `tag` into the file's ID3 chunk, creating one at the end when none exists.
///
/// The chunk and root sizes are patched afterwards; chunk contents stay word aligned.
pub fn write_tag<F: ChunkFormat, S: StorageFile>(
    mut file: S,
    tag: &Id3v2Tag,
    version: Version,
    diag: &mut Diagnostics,
) -> crate::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let root_size = read_root::<F>(&mut file)?;
    let end = HEADER_LEN + u64::from(root_size);
    let chunk = find_id3::<F>(&mut file, end)?;

    let (header_offset, region) = match chunk {
        Some(chunk) => {
            let data_start = chunk.offset + HEADER_LEN;
            (chunk.offset, data_start..data_start + u64::from(chunk.size))
        }
        None => {
            // Append an empty ID3 chunk header after the last chunk.
            let offset = file.len()?;
            file.seek(SeekFrom::Start(offset))?;
            let mut raw = [0; 8];
            raw[0..4].copy_from_slice(b"ID3 ");
            file.write_all(&raw)?;
            (offset, offset + HEADER_LEN..offset + HEADER_LEN)
        }
    };

    let mut encoded = Vec::new();
    Encoder::new().version(version).encode(tag, &mut encoded, diag)?;
    if encoded.len() % 2 == 1 {
        encoded.push(0);
    }

    let mut storage = TagRegion::with_padding(&mut file, region, 0);
    {
        let mut writer = storage.writer()?;
        writer.write_all(&encoded)?;
        writer.flush()?;
    }
    let chunk_size = storage.region().end - storage.region().start;
    drop(storage);

    // Patch the chunk size, then derive the root size from the final file length.
    let mut size_raw = [0; 4];
    F::Endianness::write_u32(&mut size_raw, chunk_size as u32);
    file.seek(SeekFrom::Start(header_offset + 4))?;
    file.write_all(&size_raw)?;

    let file_len = file.len()?;
    F::Endianness::write_u32(&mut size_raw, (file_len - HEADER_LEN) as u32);
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&size_raw)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{KnownField, Tag};
    use crate::value::TagValue;
    use std::io::Cursor;

    fn wav_file(chunks: &[(&[u8; 4], &[u8])]) -> Cursor<Vec<u8>> {
        let mut body = b"WAVE".to_vec();
        for (tag, data) in chunks {
            body.extend_from_slice(*tag);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
            if data.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut raw = b"RIFF".to_vec();
        raw.extend_from_slice(&(body.len() as u32).to_le_bytes());
        raw.extend_from_slice(&body);
        Cursor::new(raw)
    }

    fn sample_tag() -> Id3v2Tag {
        let mut tag = Id3v2Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("Chunked"));
        tag
    }

    #[test]
    fn tag_is_created_and_read_back() {
        let mut file = wav_file(&[(b"fmt ", &[0; 16]), (b"data", b"pcm-samples!")]);
        write_tag::<WavFormat, _>(
            &mut file,
            &sample_tag(),
            Version::Id3v24,
            &mut Diagnostics::new(),
        )
        .unwrap();

        let reparsed =
            read_tag::<WavFormat>(&mut file, &mut Diagnostics::new()).unwrap();
        assert_eq!(
            "Chunked",
            reparsed.value(KnownField::Title).to_text().unwrap()
        );

        // The audio chunk is untouched and the root size covers the new chunk.
        let contents = file.into_inner();
        assert!(contents
            .windows(b"pcm-samples!".len())
            .any(|w| w == b"pcm-samples!"));
        let root_size = u32::from_le_bytes(contents[4..8].try_into().unwrap());
        assert_eq!(contents.len() as u32 - 8, root_size);
    }

    #[test]
    fn existing_chunk_is_rewritten_in_place() {
        let mut file = wav_file(&[(b"fmt ", &[0; 16]), (b"data", b"pcm")]);
        write_tag::<WavFormat, _>(
            &mut file,
            &sample_tag(),
            Version::Id3v24,
            &mut Diagnostics::new(),
        )
        .unwrap();
        let mut changed = sample_tag();
        changed.set_value(KnownField::Artist, TagValue::text("Someone"));
        write_tag::<WavFormat, _>(
            &mut file,
            &changed,
            Version::Id3v24,
            &mut Diagnostics::new(),
        )
        .unwrap();

        let reparsed =
            read_tag::<WavFormat>(&mut file, &mut Diagnostics::new()).unwrap();
        assert_eq!(
            "Someone",
            reparsed.value(KnownField::Artist).to_text().unwrap()
        );
    }

    #[test]
    fn missing_chunk_reports_no_data() {
        let mut file = wav_file(&[(b"data", b"pcm")]);
        let err = read_tag::<WavFormat>(&mut file, &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoDataFound));
    }

    #[test]
    fn wrong_container_is_rejected() {
        let mut file = Cursor::new(b"fLaC....".to_vec());
        let err = read_tag::<WavFormat>(&mut file, &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidData));
    }

    #[test]
    fn aiff_uses_big_endian_sizes() {
        let mut body = b"AIFF".to_vec();
        body.extend_from_slice(b"SSND");
        body.extend_from_slice(&4u32.to_be_bytes());
        body.extend_from_slice(b"snd0");
        let mut raw = b"FORM".to_vec();
        raw.extend_from_slice(&(body.len() as u32).to_be_bytes());
        raw.extend_from_slice(&body);
        let mut file = Cursor::new(raw);

        write_tag::<AiffFormat, _>(
            &mut file,
            &sample_tag(),
            Version::Id3v23,
            &mut Diagnostics::new(),
        )
        .unwrap();
        let reparsed =
            read_tag::<AiffFormat>(&mut file, &mut Diagnostics::new()).unwrap();
        assert_eq!(
            "Chunked",
            reparsed.value(KnownField::Title).to_text().unwrap()
        );
    }
}
