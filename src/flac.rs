//! The FLAC metadata block chain.
//!
//! A raw FLAC stream starts with the `fLaC` signature followed by a chain of metadata blocks;
//! the block whose header carries the last-block flag ends the chain and the audio frames follow
//! immediately. Tags live in a `VORBIS_COMMENT` block, covers in separate `PICTURE` blocks which
//! this module folds into the comment's cover fields and splits out again on rewrite.

use crate::diag::Diagnostics;
use crate::fieldmap::TagField;
use crate::tag::KnownField;
use crate::value::{Picture, TagValue};
use crate::vorbis::{VorbisComment, VorbisCommentFlags, VorbisField, VorbisIdent};
use crate::{Error, ErrorKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// `fLaC`, big endian.
const SIGNATURE: u32 = 0x664C_6143;

const PARSE_CONTEXT: &str = "parsing FLAC metadata";

/// Metadata block types.
pub mod block_type {
    /// The mandatory first block carrying the audio parameters.
    pub const STREAM_INFO: u8 = 0;
    /// Reserved zeroed space enabling in-place rewrites.
    pub const PADDING: u8 = 1;
    /// Application specific data.
    pub const APPLICATION: u8 = 2;
    /// The seek table.
    pub const SEEK_TABLE: u8 = 3;
    /// A Vorbis comment.
    pub const VORBIS_COMMENT: u8 = 4;
    /// A cue sheet.
    pub const CUE_SHEET: u8 = 5;
    /// An embedded picture.
    pub const PICTURE: u8 = 6;
}

/// The 4-byte header preceding every metadata block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    /// Whether this block is the last one of the chain.
    pub is_last: bool,
    /// The block type, 0-126.
    pub block_type: u8,
    /// The size of the block data, excluding this header.
    pub data_size: u32,
}

impl BlockHeader {
    /// Reads a block header.
    pub fn decode(mut reader: impl Read) -> crate::Result<BlockHeader> {
        let mut raw = [0; 4];
        reader.read_exact(&mut raw)?;
        Ok(BlockHeader {
            is_last: raw[0] & 0x80 != 0,
            block_type: raw[0] & 0x7F,
            data_size: u32::from_be_bytes([0, raw[1], raw[2], raw[3]]),
        })
    }

    /// Writes the block header.
    pub fn encode(&self, mut writer: impl Write) -> crate::Result<()> {
        let size = self.data_size.to_be_bytes();
        let flag = if self.is_last { 0x80 } else { 0 };
        writer.write_all(&[flag | (self.block_type & 0x7F), size[1], size[2], size[3]])?;
        Ok(())
    }
}

/// The audio parameters from a `STREAMINFO` block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// The minimum block size in samples.
    pub min_block_size: u16,
    /// The maximum block size in samples.
    pub max_block_size: u16,
    /// The minimum frame size in bytes, 0 when unknown.
    pub min_frame_size: u32,
    /// The maximum frame size in bytes, 0 when unknown.
    pub max_frame_size: u32,
    /// The sampling frequency in Hz.
    pub sample_rate: u32,
    /// The number of channels, 1-8.
    pub channel_count: u8,
    /// The number of bits per sample, 4-32.
    pub bits_per_sample: u8,
    /// The total number of inter-channel samples, 0 when unknown.
    pub total_samples: u64,
}

impl StreamInfo {
    /// Parses the fixed 34-byte prefix of a `STREAMINFO` block.
    pub fn parse(data: &[u8; 34]) -> StreamInfo {
        let packed = u64::from_be_bytes(data[10..18].try_into().unwrap());
        StreamInfo {
            min_block_size: u16::from_be_bytes([data[0], data[1]]),
            max_block_size: u16::from_be_bytes([data[2], data[3]]),
            min_frame_size: u32::from_be_bytes([0, data[4], data[5], data[6]]),
            max_frame_size: u32::from_be_bytes([0, data[7], data[8], data[9]]),
            // 20 bits sample rate, 3 bits channel count - 1, 5 bits bits per sample - 1,
            // 36 bits total samples.
            sample_rate: (packed >> 44) as u32,
            channel_count: ((packed >> 41) & 0x7) as u8 + 1,
            bits_per_sample: ((packed >> 36) & 0x1F) as u8 + 1,
            total_samples: packed & 0xF_FFFF_FFFF,
        }
    }

    /// The duration in seconds, 0 when the sample count or rate is unknown.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_samples as f64 / f64::from(self.sample_rate)
    }
}

/// A `PICTURE` metadata block, also the payload of `METADATA_BLOCK_PICTURE` comments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureBlock {
    /// The picture type, following the ID3v2 APIC scheme.
    pub picture_type: u32,
    /// Width in pixels, 0 when unknown.
    pub width: u32,
    /// Height in pixels, 0 when unknown.
    pub height: u32,
    /// Color depth in bits per pixel, 0 when unknown.
    pub depth: u32,
    /// Number of colors for indexed pictures, 0 otherwise.
    pub colors: u32,
    /// MIME type, description and image data.
    pub picture: Picture,
}

impl PictureBlock {
    /// Parses a picture block of `max_size` bytes.
    pub fn parse(mut reader: impl Read, max_size: u64) -> crate::Result<PictureBlock> {
        let mut remaining = max_size;
        let mut take = |n: u64| -> crate::Result<usize> {
            if n > remaining {
                return Err(Error::new(
                    ErrorKind::TruncatedData,
                    "picture block is truncated",
                ));
            }
            remaining -= n;
            Ok(n as usize)
        };

        take(8)?;
        let picture_type = reader.read_u32::<BigEndian>()?;
        let mime_len = reader.read_u32::<BigEndian>()?;
        let mut mime = vec![0; take(u64::from(mime_len))?];
        reader.read_exact(&mut mime)?;
        take(4)?;
        let desc_len = reader.read_u32::<BigEndian>()?;
        let mut desc = vec![0; take(u64::from(desc_len))?];
        reader.read_exact(&mut desc)?;
        take(16)?;
        let width = reader.read_u32::<BigEndian>()?;
        let height = reader.read_u32::<BigEndian>()?;
        let depth = reader.read_u32::<BigEndian>()?;
        let colors = reader.read_u32::<BigEndian>()?;
        take(4)?;
        let data_len = reader.read_u32::<BigEndian>()?;
        let mut data = vec![0; take(u64::from(data_len))?];
        reader.read_exact(&mut data)?;

        Ok(PictureBlock {
            picture_type,
            width,
            height,
            depth,
            colors,
            picture: Picture {
                mime_type: String::from_utf8(mime)?,
                description: String::from_utf8(desc)?,
                data,
            },
        })
    }

    /// The number of bytes [`PictureBlock::make`] will write.
    pub fn required_size(&self) -> u32 {
        32 + (self.picture.mime_type.len() + self.picture.description.len() + self.picture.data.len())
            as u32
    }

    /// Writes the picture block.
    pub fn make(&self, mut writer: impl Write) -> crate::Result<()> {
        writer.write_u32::<BigEndian>(self.picture_type)?;
        writer.write_u32::<BigEndian>(self.picture.mime_type.len() as u32)?;
        writer.write_all(self.picture.mime_type.as_bytes())?;
        writer.write_u32::<BigEndian>(self.picture.description.len() as u32)?;
        writer.write_all(self.picture.description.as_bytes())?;
        writer.write_u32::<BigEndian>(self.width)?;
        writer.write_u32::<BigEndian>(self.height)?;
        writer.write_u32::<BigEndian>(self.depth)?;
        writer.write_u32::<BigEndian>(self.colors)?;
        writer.write_u32::<BigEndian>(self.picture.data.len() as u32)?;
        writer.write_all(&self.picture.data)?;
        Ok(())
    }
}

/// A parsed raw FLAC stream: audio parameters, the folded Vorbis comment and the layout facts a
/// rewrite needs.
#[derive(Clone, Debug, Default)]
pub struct FlacStream {
    start_offset: u64,
    info: StreamInfo,
    comment: Option<VorbisComment>,
    padding_size: u32,
    stream_offset: u64,
}

impl FlacStream {
    /// Parses the metadata block chain beginning at `start_offset`.
    pub fn parse(
        mut reader: impl Read + Seek,
        start_offset: u64,
        diag: &mut Diagnostics,
    ) -> crate::Result<FlacStream> {
        reader.seek(SeekFrom::Start(start_offset))?;
        if reader.read_u32::<BigEndian>()? != SIGNATURE {
            diag.critical(PARSE_CONTEXT, "Signature (fLaC) not found.");
            return Err(Error::new(
                ErrorKind::InvalidData,
                "stream is not a FLAC stream",
            ));
        }

        let mut stream = FlacStream {
            start_offset,
            ..FlacStream::default()
        };
        let mut first = true;
        loop {
            let header = BlockHeader::decode(&mut reader)?;
            let block_start = reader.stream_position()?;
            debug!(
                "metadata block type {}, {} bytes",
                header.block_type, header.data_size
            );
            if first && header.block_type != block_type::STREAM_INFO {
                diag.warn(
                    PARSE_CONTEXT,
                    "First metadata block is not \"METADATA_BLOCK_STREAMINFO\".",
                );
            }
            first = false;

            match header.block_type {
                block_type::STREAM_INFO => {
                    if header.data_size >= 34 {
                        let mut raw = [0; 34];
                        reader.read_exact(&mut raw)?;
                        stream.info = StreamInfo::parse(&raw);
                    } else {
                        diag.critical(
                            PARSE_CONTEXT,
                            "\"METADATA_BLOCK_STREAMINFO\" is truncated and will be ignored.",
                        );
                    }
                }
                block_type::VORBIS_COMMENT => {
                    let flags =
                        VorbisCommentFlags::NO_SIGNATURE | VorbisCommentFlags::NO_FRAMING_BYTE;
                    match VorbisComment::parse(
                        &mut reader,
                        u64::from(header.data_size),
                        flags,
                        diag,
                    ) {
                        // Multiple comment blocks are merged and treated as one.
                        Ok(parsed) => match stream.comment.as_mut() {
                            Some(comment) => comment.merge(parsed),
                            None => stream.comment = Some(parsed),
                        },
                        Err(err) => diag.critical(
                            PARSE_CONTEXT,
                            format!("\"VORBIS_COMMENT\" block cannot be parsed: {}", err),
                        ),
                    }
                }
                block_type::PICTURE => {
                    match PictureBlock::parse(&mut reader, u64::from(header.data_size)) {
                        Ok(block) => {
                            if block.picture.data.is_empty() {
                                diag.warn(
                                    PARSE_CONTEXT,
                                    "\"METADATA_BLOCK_PICTURE\" contains no picture.",
                                );
                            } else {
                                stream.fold_picture(block);
                            }
                        }
                        Err(err) => diag.critical(
                            PARSE_CONTEXT,
                            format!(
                                "\"METADATA_BLOCK_PICTURE\" cannot be parsed and will be \
                                 ignored: {}",
                                err
                            ),
                        ),
                    }
                }
                block_type::PADDING => {
                    stream.padding_size += 4 + header.data_size;
                }
                _ => {}
            }

            reader.seek(SeekFrom::Start(block_start + u64::from(header.data_size)))?;
            if header.is_last {
                break;
            }
        }
        stream.stream_offset = reader.stream_position()?;
        Ok(stream)
    }

    fn fold_picture(&mut self, block: PictureBlock) {
        let comment = self.comment.get_or_insert_with(|| {
            let mut comment = VorbisComment::new();
            comment.set_vendor(TagValue::text(concat!(
                "mediatag ",
                env!("CARGO_PKG_VERSION")
            )));
            comment
        });
        let ident = VorbisComment::field_id(KnownField::Cover).unwrap();
        let mut field = VorbisField::new(ident, TagValue::Picture(block.picture));
        field.set_cover_type(block.picture_type);
        comment.fields_mut().insert(field);
    }

    /// The audio parameters of the stream.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// The offset of the first audio frame, i.e. the position right after the last metadata
    /// block.
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// The accumulated size of all padding blocks, headers included.
    pub fn padding_size(&self) -> u32 {
        self.padding_size
    }

    /// The Vorbis comment, if one is present.
    pub fn comment(&self) -> Option<&VorbisComment> {
        self.comment.as_ref()
    }

    /// The Vorbis comment for mutation, if one is present.
    pub fn comment_mut(&mut self) -> Option<&mut VorbisComment> {
        self.comment.as_mut()
    }

    /// Returns the Vorbis comment, creating an empty one first when none is present.
    pub fn create_comment(&mut self) -> &mut VorbisComment {
        self.comment.get_or_insert_with(VorbisComment::new)
    }

    /// Removes the Vorbis comment. Returns whether one was present.
    pub fn remove_comment(&mut self) -> bool {
        self.comment.take().is_some()
    }

    /// Writes the updated metadata header to `writer`.
    ///
    /// Copies the signature and every block which is neither a comment, a picture nor padding
    /// from `original`, then emits a single `VORBIS_COMMENT` block (covers suppressed) followed
    /// by one `PICTURE` block per cover field. The last emitted block carries the last-block
    /// flag; when no comment is present the caller must terminate the chain itself, e.g. with
    /// [`FlacStream::make_padding`].
    ///
    /// Returns the offset of the last written block header within `writer`.
    pub fn make_header(
        &self,
        mut original: impl Read + Seek,
        mut writer: impl Write + Seek,
        diag: &mut Diagnostics,
    ) -> crate::Result<u64> {
        original.seek(SeekFrom::Start(self.start_offset + 4))?;
        writer.write_u32::<BigEndian>(SIGNATURE)?;

        let mut last_start = 0;
        loop {
            let header = BlockHeader::decode(&mut original)?;
            match header.block_type {
                // Written separately below and on demand, respectively.
                block_type::VORBIS_COMMENT | block_type::PICTURE | block_type::PADDING => {
                    original.seek(SeekFrom::Current(i64::from(header.data_size)))?;
                }
                _ => {
                    last_start = writer.stream_position()?;
                    BlockHeader {
                        is_last: false,
                        ..header
                    }
                    .encode(&mut writer)?;
                    let mut block = (&mut original).take(u64::from(header.data_size));
                    io::copy(&mut block, &mut writer)?;
                }
            }
            if header.is_last {
                break;
            }
        }

        let comment = match &self.comment {
            Some(comment) => comment,
            None => return Ok(last_start),
        };

        // Reserve space for the block header, write the comment, then patch the header in.
        last_start = writer.stream_position()?;
        writer.write_all(&[0; 4])?;
        comment.make(
            &mut writer,
            VorbisCommentFlags::NO_SIGNATURE
                | VorbisCommentFlags::NO_FRAMING_BYTE
                | VorbisCommentFlags::NO_COVERS,
            diag,
        )?;
        let end = writer.stream_position()?;

        let cover_ident = VorbisIdent::from(VorbisComment::field_id(KnownField::Cover).unwrap());
        let covers: Vec<&VorbisField> = comment
            .fields()
            .all(&cover_ident)
            .filter(|field| field.value().picture().is_some())
            .collect();

        writer.seek(SeekFrom::Start(last_start))?;
        BlockHeader {
            is_last: covers.is_empty(),
            block_type: block_type::VORBIS_COMMENT,
            data_size: (end - last_start - 4) as u32,
        }
        .encode(&mut writer)?;
        writer.seek(SeekFrom::Start(end))?;

        for (index, field) in covers.iter().enumerate() {
            let block = PictureBlock {
                picture_type: field.cover_type(),
                width: 0,
                height: 0,
                depth: 0,
                colors: 0,
                picture: field.value().picture().unwrap().clone(),
            };
            last_start = writer.stream_position()?;
            BlockHeader {
                is_last: index + 1 == covers.len(),
                block_type: block_type::PICTURE,
                data_size: block.required_size(),
            }
            .encode(&mut writer)?;
            block.make(&mut writer)?;
        }
        Ok(last_start)
    }

    /// Writes a padding block of `size` bytes in total, header included.
    ///
    /// `size` must be at least 4 bytes.
    pub fn make_padding(mut writer: impl Write, size: u32, is_last: bool) -> crate::Result<()> {
        BlockHeader {
            is_last,
            block_type: block_type::PADDING,
            data_size: size - 4,
        }
        .encode(&mut writer)?;
        io::copy(&mut io::repeat(0).take(u64::from(size - 4)), &mut writer)?;
        Ok(())
    }
}
