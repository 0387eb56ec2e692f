//! Ogg page framing.
//!
//! An Ogg physical stream is a sequence of pages, each carrying up to 255 segments of up to 255
//! bytes. A lacing value of 255 continues the packet into the following segment, possibly on the
//! next page of the same serial number. [`OggIterator`] hides the framing and presents the
//! logical byte stream; [`rewrite_comment`] rebuilds the Vorbis comment packet and re-frames the
//! affected pages.

use crate::diag::Diagnostics;
use crate::vorbis::{VorbisComment, VorbisCommentFlags};
use crate::{Error, ErrorKind};
use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// The capture pattern starting every page.
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

const READ_CONTEXT: &str = "parsing Ogg stream";
const WRITE_CONTEXT: &str = "making Ogg stream";

bitflags! {
    /// The header type flags of a page.
    pub struct PageFlags: u8 {
        /// The first packet of the page continues a packet of the previous page.
        const CONTINUED = 0x01;
        /// Beginning of a logical stream.
        const FIRST = 0x02;
        /// End of a logical stream.
        const LAST = 0x04;
    }
}

/// A parsed page header plus the offsets needed to get back to its data.
#[derive(Clone, Debug)]
pub struct PageHeader {
    /// Header type flags.
    pub flags: PageFlags,
    /// The granule position, codec specific.
    pub granule_position: u64,
    /// The serial number of the logical stream this page belongs to.
    pub serial: u32,
    /// The page sequence number within the logical stream.
    pub sequence: u32,
    /// The page checksum as stored.
    pub checksum: u32,
    /// The lacing values of the segments of this page.
    pub segment_table: Vec<u8>,
    /// The absolute offset of the capture pattern.
    pub start_offset: u64,
}

impl PageHeader {
    /// Reads a page header. The reader must be positioned at the capture pattern.
    pub fn decode(mut reader: impl Read, start_offset: u64) -> crate::Result<PageHeader> {
        let mut fixed = [0; 27];
        reader.read_exact(&mut fixed)?;
        if &fixed[0..4] != CAPTURE_PATTERN {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "capture pattern \"OggS\" not found",
            ));
        }
        if fixed[4] != 0 {
            return Err(Error::new(
                ErrorKind::VersionNotSupported,
                "Ogg stream version is not supported",
            ));
        }
        let flags = PageFlags::from_bits_truncate(fixed[5]);
        let granule_position = u64::from_le_bytes(fixed[6..14].try_into().unwrap());
        let serial = u32::from_le_bytes(fixed[14..18].try_into().unwrap());
        let sequence = u32::from_le_bytes(fixed[18..22].try_into().unwrap());
        let checksum = u32::from_le_bytes(fixed[22..26].try_into().unwrap());
        let mut segment_table = vec![0; fixed[26] as usize];
        reader.read_exact(&mut segment_table)?;
        Ok(PageHeader {
            flags,
            granule_position,
            serial,
            sequence,
            checksum,
            segment_table,
            start_offset,
        })
    }

    /// Writes the page header, including the stored checksum.
    pub fn encode(&self, mut writer: impl Write) -> crate::Result<()> {
        writer.write_all(CAPTURE_PATTERN)?;
        writer.write_u8(0)?;
        writer.write_u8(self.flags.bits())?;
        writer.write_u64::<LittleEndian>(self.granule_position)?;
        writer.write_u32::<LittleEndian>(self.serial)?;
        writer.write_u32::<LittleEndian>(self.sequence)?;
        writer.write_u32::<LittleEndian>(self.checksum)?;
        writer.write_u8(self.segment_table.len() as u8)?;
        writer.write_all(&self.segment_table)?;
        Ok(())
    }

    /// The size of the header on disk.
    pub fn header_size(&self) -> u64 {
        27 + self.segment_table.len() as u64
    }

    /// The size of the page data following the header.
    pub fn data_size(&self) -> u64 {
        self.segment_table.iter().map(|l| u64::from(*l)).sum()
    }

    /// The absolute offset of the page data.
    pub fn data_offset(&self) -> u64 {
        self.start_offset + self.header_size()
    }

    /// The total size of the page on disk.
    pub fn total_size(&self) -> u64 {
        self.header_size() + self.data_size()
    }
}

/// The CRC-32 used by Ogg pages: polynomial 0x04c11db7, no reflection, zero initial value.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_continue(0, data)
}

fn crc32_continue(crc: u32, data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut r = (i as u32) << 24;
            let mut bit = 0;
            while bit < 8 {
                r = if r & 0x8000_0000 != 0 {
                    (r << 1) ^ 0x04C1_1DB7
                } else {
                    r << 1
                };
                bit += 1;
            }
            table[i] = r;
            i += 1;
        }
        table
    };
    data.iter().fold(crc, |crc, byte| {
        (crc << 8) ^ TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// Computes the checksum of a page from its final header (checksum field ignored) and data.
pub fn page_checksum(header: &PageHeader, data: &[u8]) -> u32 {
    let mut raw = Vec::with_capacity(header.header_size() as usize);
    let zeroed = PageHeader {
        checksum: 0,
        segment_table: header.segment_table.clone(),
        ..*header
    };
    zeroed.encode(&mut raw).unwrap();
    crc32_continue(crc32(&raw), data)
}

/// A cursor over the logical byte stream carried by the pages of one serial number.
///
/// Reads continue transparently across segments and pages; packet boundaries are exposed through
/// [`OggIterator::packet_size`].
pub struct OggIterator<R> {
    reader: R,
    pages: Vec<PageHeader>,
    serial: u32,
    page: usize,
    segment: usize,
    segment_offset: u64,
    consumed: u64,
}

impl<R: Read + Seek> OggIterator<R> {
    /// Scans all page headers starting at `start_offset` and positions the cursor on the first
    /// segment of the first page.
    pub fn new(mut reader: R, start_offset: u64) -> crate::Result<OggIterator<R>> {
        let end = reader.seek(SeekFrom::End(0))?;
        let mut pages = Vec::new();
        let mut offset = start_offset;
        while offset < end {
            reader.seek(SeekFrom::Start(offset))?;
            let header = PageHeader::decode(&mut reader, offset)?;
            offset += header.total_size();
            pages.push(header);
        }
        if pages.is_empty() {
            return Err(Error::new(ErrorKind::NoDataFound, "stream contains no page"));
        }
        let serial = pages[0].serial;
        Ok(OggIterator {
            reader,
            pages,
            serial,
            page: 0,
            segment: 0,
            segment_offset: 0,
            consumed: 0,
        })
    }

    /// All scanned page headers, in stream order.
    pub fn pages(&self) -> &[PageHeader] {
        &self.pages
    }

    /// The page the cursor is on, or None past the end.
    pub fn current_page(&self) -> Option<&PageHeader> {
        self.pages.get(self.page)
    }

    /// The index of the page the cursor is on.
    pub fn current_page_index(&self) -> usize {
        self.page
    }

    /// The index of the segment the cursor is on within the current page.
    pub fn current_segment(&self) -> usize {
        self.segment
    }

    /// Validates the stored checksum of the page at `index`.
    pub fn validate_checksum(&mut self, index: usize) -> crate::Result<bool> {
        let header = self.pages[index].clone();
        self.reader.seek(SeekFrom::Start(header.data_offset()))?;
        let mut data = vec![0; header.data_size() as usize];
        self.reader.read_exact(&mut data)?;
        Ok(page_checksum(&header, &data) == header.checksum)
    }

    /// The size of the packet beginning at the cursor, following lacing continuation across
    /// pages. Returns None when the cursor is past the end of the stream.
    ///
    /// Must be called on a packet boundary, i.e. before any byte of the packet has been read.
    pub fn packet_size(&self) -> Option<u64> {
        let mut page = self.page;
        let mut segment = self.segment;
        let mut consumed = self.consumed;

        // Step past segments the cursor has already fully consumed (and zero-length packet
        // terminators) so a call right after reading one packet reports the next one.
        loop {
            let header = self.pages.get(page)?;
            if header.serial != self.serial {
                page += 1;
                segment = 0;
                consumed = 0;
                continue;
            }
            match header.segment_table.get(segment) {
                Some(&lacing) => {
                    if consumed == u64::from(lacing) {
                        segment += 1;
                        consumed = 0;
                        continue;
                    }
                    break;
                }
                None => {
                    page += 1;
                    segment = 0;
                    consumed = 0;
                }
            }
        }

        let mut size = 0u64;
        loop {
            let header = self.pages.get(page)?;
            if header.serial != self.serial {
                page += 1;
                segment = 0;
                continue;
            }
            match header.segment_table.get(segment) {
                Some(&lacing) => {
                    size += u64::from(lacing);
                    if lacing < 255 {
                        return Some(size);
                    }
                    segment += 1;
                }
                None => {
                    page += 1;
                    segment = 0;
                }
            }
        }
    }

    /// Skips `n` logical bytes.
    pub fn advance(&mut self, n: u64) -> crate::Result<()> {
        let copied = io::copy(&mut self.by_ref().take(n), &mut io::sink())?;
        if copied < n {
            return Err(Error::new(
                ErrorKind::TruncatedData,
                "Ogg stream ended unexpectedly",
            ));
        }
        Ok(())
    }

    /// Moves the cursor to the first segment of the next page of the iterated serial.
    fn next_matching_page(&mut self) {
        loop {
            self.page += 1;
            self.segment = 0;
            self.segment_offset = 0;
            self.consumed = 0;
            match self.pages.get(self.page) {
                Some(header) if header.serial != self.serial => continue,
                _ => return,
            }
        }
    }
}

impl<R: Read + Seek> Read for OggIterator<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let header = match self.pages.get(self.page) {
                Some(header) => header,
                None => break,
            };
            let lacing = match header.segment_table.get(self.segment) {
                Some(&lacing) => u64::from(lacing),
                None => {
                    self.next_matching_page();
                    continue;
                }
            };
            if self.consumed == lacing {
                self.segment += 1;
                self.segment_offset += lacing;
                self.consumed = 0;
                continue;
            }
            let abs = header.data_offset() + self.segment_offset + self.consumed;
            let want = ((lacing - self.consumed) as usize).min(buf.len() - filled);
            self.reader.seek(SeekFrom::Start(abs))?;
            let nread = self.reader.read(&mut buf[filled..filled + want])?;
            if nread == 0 {
                break;
            }
            self.consumed += nread as u64;
            filled += nread;
        }
        Ok(filled)
    }
}

/// Reads the Vorbis comment of the logical stream starting at `start_offset`.
///
/// The comment is the second packet of the stream, after the identification header.
pub fn read_comment<R: Read + Seek>(
    reader: R,
    start_offset: u64,
    diag: &mut Diagnostics,
) -> crate::Result<VorbisComment> {
    let mut iter = OggIterator::new(reader, start_offset)?;

    let id_size = iter
        .packet_size()
        .ok_or_else(|| Error::new(ErrorKind::NoDataFound, "stream contains no packet"))?;
    let mut id_signature = [0; 7];
    if id_size >= 7 {
        iter.read_exact(&mut id_signature)?;
        if &id_signature != b"\x01vorbis" {
            diag.warn(
                READ_CONTEXT,
                "Identification header signature is not \"\\x01vorbis\".",
            );
        }
        iter.advance(id_size - 7)?;
    } else {
        iter.advance(id_size)?;
    }

    let comment_size = iter.packet_size().ok_or_else(|| {
        Error::new(ErrorKind::NoDataFound, "stream contains no comment packet")
    })?;
    // The comment parser must not read past the packet, even if more data follows.
    let mut packet = (&mut iter).take(comment_size);
    VorbisComment::parse(&mut packet, comment_size, VorbisCommentFlags::empty(), diag)
}

/// Rewrites the stream at `start_offset`, replacing the Vorbis comment packet with `comment`.
///
/// The identification page is copied verbatim. The comment and the remaining header packets are
/// re-framed into new pages with fresh sequence numbers and checksums; all following pages keep
/// their data, granule positions and serial numbers and only have their sequence numbers and
/// checksums rewritten. Packet boundaries are preserved throughout.
pub fn rewrite_comment<R: Read + Seek, W: Write>(
    mut reader: R,
    mut writer: W,
    start_offset: u64,
    comment: &VorbisComment,
    diag: &mut Diagnostics,
) -> crate::Result<()> {
    let end = reader.seek(SeekFrom::End(0))?;
    let mut pages = Vec::new();
    let mut offset = start_offset;
    while offset < end {
        reader.seek(SeekFrom::Start(offset))?;
        let header = PageHeader::decode(&mut reader, offset)?;
        offset += header.total_size();
        pages.push(header);
    }
    if pages.is_empty() {
        return Err(Error::new(ErrorKind::NoDataFound, "stream contains no page"));
    }
    let serial = pages[0].serial;

    // The identification header page passes through untouched.
    copy_page(&mut reader, &mut writer, &pages[0])?;

    // Gather the packets of the remaining header pages. Walking whole pages keeps the audio
    // pages byte-identical; only the header region is re-framed.
    let mut packets: Vec<Vec<u8>> = Vec::new();
    let mut packet = Vec::new();
    let mut packets_done = 0;
    let mut first_audio_page = pages.len();
    for (index, header) in pages.iter().enumerate().skip(1) {
        if header.serial != serial {
            diag.warn(
                WRITE_CONTEXT,
                "Stream is multiplexed; pages of other streams are copied verbatim.",
            );
            continue;
        }
        reader.seek(SeekFrom::Start(header.data_offset()))?;
        for &lacing in &header.segment_table {
            let mut segment = vec![0; usize::from(lacing)];
            reader.read_exact(&mut segment)?;
            packet.extend_from_slice(&segment);
            if lacing < 255 {
                packets.push(std::mem::take(&mut packet));
                packets_done += 1;
            }
        }
        if packets_done >= 2 && packet.is_empty() {
            first_audio_page = index + 1;
            break;
        }
    }
    if packets.is_empty() {
        return Err(Error::new(
            ErrorKind::NoDataFound,
            "stream contains no comment packet",
        ));
    }
    if !packet.is_empty() {
        diag.warn(
            WRITE_CONTEXT,
            "Header packet is truncated; the remainder is dropped.",
        );
    }

    debug!("re-framing {} header packets", packets.len());

    // Replace the comment packet, keeping the setup header and any further packets.
    let mut rebuilt = Vec::new();
    comment.make(&mut rebuilt, VorbisCommentFlags::empty(), diag)?;
    packets[0] = rebuilt;

    let mut sequence = 1;
    write_packets(&mut writer, serial, &mut sequence, &packets)?;

    // Copy the audio pages, renumbering and re-checksumming pages of the rewritten stream.
    for header in &pages[first_audio_page..] {
        if header.serial != serial {
            copy_page(&mut reader, &mut writer, header)?;
            continue;
        }
        reader.seek(SeekFrom::Start(header.data_offset()))?;
        let mut data = vec![0; header.data_size() as usize];
        reader.read_exact(&mut data)?;
        let mut header = header.clone();
        header.sequence = sequence;
        sequence += 1;
        header.checksum = page_checksum(&header, &data);
        header.encode(&mut writer)?;
        writer.write_all(&data)?;
    }
    Ok(())
}

fn copy_page<R: Read + Seek, W: Write>(
    reader: &mut R,
    writer: &mut W,
    header: &PageHeader,
) -> crate::Result<()> {
    reader.seek(SeekFrom::Start(header.start_offset))?;
    let copied = io::copy(&mut reader.take(header.total_size()), writer)?;
    if copied < header.total_size() {
        return Err(Error::new(ErrorKind::TruncatedData, "page is truncated"));
    }
    Ok(())
}

/// Frames `packets` into pages of up to 255 segments, flagging continuation across page breaks.
fn write_packets<W: Write>(
    writer: &mut W,
    serial: u32,
    sequence: &mut u32,
    packets: &[Vec<u8>],
) -> crate::Result<()> {
    // Lacing values for every packet, packet index attached to detect page-break continuation.
    let mut lacings: Vec<(usize, u8)> = Vec::new();
    for (index, packet) in packets.iter().enumerate() {
        let mut len = packet.len();
        loop {
            if len >= 255 {
                lacings.push((index, 255));
                len -= 255;
            } else {
                lacings.push((index, len as u8));
                break;
            }
        }
    }

    let mut cursor = 0;
    let mut data_cursors = vec![0usize; packets.len()];
    while cursor < lacings.len() {
        let table: Vec<u8> = lacings[cursor..]
            .iter()
            .take(255)
            .map(|(_, lacing)| *lacing)
            .collect();
        let continued = cursor > 0 && lacings[cursor - 1].1 == 255;
        let mut data = Vec::new();
        for (packet_index, lacing) in &lacings[cursor..cursor + table.len()] {
            let start = data_cursors[*packet_index];
            data.extend_from_slice(&packets[*packet_index][start..start + usize::from(*lacing)]);
            data_cursors[*packet_index] += usize::from(*lacing);
        }
        let mut header = PageHeader {
            flags: if continued {
                PageFlags::CONTINUED
            } else {
                PageFlags::empty()
            },
            granule_position: 0,
            serial,
            sequence: *sequence,
            checksum: 0,
            segment_table: table,
            start_offset: 0,
        };
        *sequence += 1;
        header.checksum = page_checksum(&header, &data);
        header.encode(&mut *writer)?;
        writer.write_all(&data)?;
        cursor += header.segment_table.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_known_vector() {
        // CRC of "123456789" under the unreflected 0x04c11db7 polynomial with zero init.
        assert_eq!(0x89A1_897F, crc32(b"123456789"));
        assert_eq!(0, crc32(b""));
    }

    #[test]
    fn page_header_round_trip() {
        let header = PageHeader {
            flags: PageFlags::FIRST,
            granule_position: 0x0102_0304_0506_0708,
            serial: 0xDEAD_BEEF,
            sequence: 7,
            checksum: 0xCAFE_BABE,
            segment_table: vec![255, 10],
            start_offset: 0,
        };
        let mut raw = Vec::new();
        header.encode(&mut raw).unwrap();
        assert_eq!(header.header_size() as usize, raw.len());
        let reparsed = PageHeader::decode(io::Cursor::new(&raw), 0).unwrap();
        assert_eq!(header.flags, reparsed.flags);
        assert_eq!(header.granule_position, reparsed.granule_position);
        assert_eq!(header.serial, reparsed.serial);
        assert_eq!(header.sequence, reparsed.sequence);
        assert_eq!(header.checksum, reparsed.checksum);
        assert_eq!(header.segment_table, reparsed.segment_table);
        assert_eq!(265, reparsed.data_size());
    }

    #[test]
    fn packets_survive_framing() {
        // Three packets, one of them long enough to span segments.
        let packets = vec![vec![1u8; 10], vec![2u8; 600], vec![3u8; 255]];
        let mut raw = Vec::new();
        let mut sequence = 0;
        write_packets(&mut raw, 42, &mut sequence, &packets).unwrap();

        let mut iter = OggIterator::new(io::Cursor::new(raw), 0).unwrap();
        let mut read_back = Vec::new();
        while let Some(size) = iter.packet_size() {
            let mut packet = vec![0; size as usize];
            iter.read_exact(&mut packet).unwrap();
            read_back.push(packet);
            if read_back.len() == packets.len() {
                break;
            }
        }
        assert_eq!(packets, read_back);
        for index in 0..iter.pages().len() {
            assert!(iter.validate_checksum(index).unwrap());
        }
    }

    #[test]
    fn lacing_boundary_packet_gets_zero_terminator() {
        // A packet of exactly 255 bytes needs a 0-length terminating segment.
        let packets = vec![vec![9u8; 255]];
        let mut raw = Vec::new();
        let mut sequence = 0;
        write_packets(&mut raw, 1, &mut sequence, &packets).unwrap();
        let iter = OggIterator::new(io::Cursor::new(raw), 0).unwrap();
        assert_eq!(vec![255, 0], iter.pages()[0].segment_table);
        assert_eq!(Some(255), iter.packet_size());
    }
}
