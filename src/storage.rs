//! In-place rewriting of a tag region within a larger file.
//!
//! Containers that embed a tag in front of (or inside) the audio data allow the tag to be
//! rewritten without touching the audio as long as the new tag fits into the old region plus its
//! trailing padding. [`TagRegion`] models that region: writes are buffered, and on flush either
//! land in place (the remainder zero-padded) or the data following the region is moved towards
//! the end of the file first, leaving fresh padding for the next rewrite.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

/// Backing storage a [`TagRegion`] can operate on.
pub trait StorageFile: Read + Write + Seek {
    /// Truncates or extends the storage to `new_len` bytes.
    fn set_len(&mut self, new_len: u64) -> io::Result<()>;

    /// The current total length of the storage.
    fn len(&mut self) -> io::Result<u64> {
        let position = self.stream_position()?;
        let len = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(position))?;
        Ok(len)
    }
}

impl<T: StorageFile + ?Sized> StorageFile for &mut T {
    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        (**self).set_len(new_len)
    }
}

impl StorageFile for fs::File {
    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        fs::File::set_len(self, new_len)
    }
}

impl StorageFile for io::Cursor<Vec<u8>> {
    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        self.get_mut().resize(new_len as usize, 0);
        Ok(())
    }
}

/// The amount of padding reserved after the tag whenever the file has to be rearranged anyway.
const PREFERRED_PADDING: u64 = 2048;

/// A writable window of a file holding a tag, padding included.
#[derive(Debug)]
pub struct TagRegion<F: StorageFile> {
    file: F,
    region: Range<u64>,
    preferred_padding: u64,
}

impl<F: StorageFile> TagRegion<F> {
    /// Creates a region with the default preferred padding.
    pub fn new(file: F, region: Range<u64>) -> TagRegion<F> {
        TagRegion::with_padding(file, region, PREFERRED_PADDING)
    }

    /// Creates a region that reserves `preferred_padding` bytes of padding when data has to be
    /// moved.
    pub fn with_padding(file: F, region: Range<u64>, preferred_padding: u64) -> TagRegion<F> {
        TagRegion {
            file,
            region,
            preferred_padding,
        }
    }

    /// The current region, padding included.
    pub fn region(&self) -> Range<u64> {
        self.region.clone()
    }

    /// Gives the backing storage back.
    pub fn into_inner(self) -> F {
        self.file
    }

    /// Opens a reader over the region.
    pub fn reader(&mut self) -> io::Result<RegionReader<'_, F>> {
        self.file.seek(SeekFrom::Start(self.region.start))?;
        Ok(RegionReader { region: self })
    }

    /// Opens a buffered writer over the region.
    ///
    /// Nothing reaches the file until [`RegionWriter::flush`] is called; dropping the writer
    /// flushes as well but swallows errors.
    pub fn writer(&mut self) -> io::Result<RegionWriter<'_, F>> {
        Ok(RegionWriter {
            region: self,
            buffer: io::Cursor::new(Vec::new()),
            dirty: false,
        })
    }

    fn region_len(&self) -> u64 {
        self.region.end - self.region.start
    }

    /// Moves everything after the region towards the file end so the region can hold `needed`
    /// bytes plus preferred padding.
    fn grow(&mut self, needed: u64) -> io::Result<()> {
        let old_len = self.file.len()?;
        let tail_len = old_len - self.region.end;
        let new_region_end = self.region.start + needed + self.preferred_padding;
        let shift = new_region_end - self.region.end;
        self.file.set_len(old_len + shift)?;

        // Copy the tail backwards in chunks so source and destination never overlap.
        let mut chunk = [0u8; 8192];
        let mut remaining = tail_len;
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64);
            let src = self.region.end + remaining - n;
            self.file.seek(SeekFrom::Start(src))?;
            self.file.read_exact(&mut chunk[..n as usize])?;
            self.file.seek(SeekFrom::Start(src + shift))?;
            self.file.write_all(&chunk[..n as usize])?;
            remaining -= n;
        }
        self.region.end = new_region_end;
        Ok(())
    }
}

/// Reads the current contents of a region. Created by [`TagRegion::reader`].
pub struct RegionReader<'a, F: StorageFile> {
    region: &'a mut TagRegion<F>,
}

impl<F: StorageFile> Read for RegionReader<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.region.file.stream_position()?;
        if position >= self.region.region.end {
            return Ok(0);
        }
        let available = (self.region.region.end - position).min(buf.len() as u64);
        self.region.file.read(&mut buf[..available as usize])
    }
}

/// Writes new contents of a region. Created by [`TagRegion::writer`].
pub struct RegionWriter<'a, F: StorageFile> {
    region: &'a mut TagRegion<F>,
    buffer: io::Cursor<Vec<u8>>,
    dirty: bool,
}

impl<F: StorageFile> Write for RegionWriter<'_, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.dirty = true;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let needed = self.buffer.get_ref().len() as u64;
        if needed > self.region.region_len() {
            self.region.grow(needed)?;
        }

        self.region
            .file
            .seek(SeekFrom::Start(self.region.region.start))?;
        self.region.file.write_all(self.buffer.get_ref())?;
        // Erase stale bytes between the new end of the tag and the end of the region.
        let leftover = self.region.region_len() - needed;
        io::copy(
            &mut io::repeat(0).take(leftover),
            &mut self.region.file,
        )?;
        self.region.file.flush()?;
        self.dirty = false;
        Ok(())
    }
}

impl<F: StorageFile> Seek for RegionWriter<'_, F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl<F: StorageFile> Drop for RegionWriter<'_, F> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_file() -> io::Cursor<Vec<u8>> {
        // 0..32 head, 32..64 region, 64..128 tail.
        io::Cursor::new((0..128).collect())
    }

    #[test]
    fn reader_is_bounded_to_the_region() {
        let mut region = TagRegion::new(probe_file(), 32..64);
        let mut contents = Vec::new();
        region.reader().unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!((32..64).collect::<Vec<u8>>(), contents);
    }

    #[test]
    fn write_within_region_pads_with_zeroes() {
        let mut region = TagRegion::with_padding(probe_file(), 32..64, 8);
        {
            let mut writer = region.writer().unwrap();
            writer.write_all(&[0xAA; 16]).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(32..64, region.region());
        let contents = region.into_inner().into_inner();
        assert_eq!(128, contents.len());
        assert_eq!(&[0xAA; 16], &contents[32..48]);
        assert!(contents[48..64].iter().all(|b| *b == 0));
        assert_eq!((64..128).collect::<Vec<u8>>(), &contents[64..]);
    }

    #[test]
    fn write_beyond_region_moves_the_tail() {
        let mut region = TagRegion::with_padding(probe_file(), 32..64, 8);
        {
            let mut writer = region.writer().unwrap();
            writer.write_all(&[0xBB; 100]).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(32..140, region.region());
        let contents = region.into_inner().into_inner();
        assert_eq!(204, contents.len());
        assert_eq!((0..32).collect::<Vec<u8>>(), &contents[..32]);
        assert_eq!(&[0xBB; 100], &contents[32..132]);
        assert!(contents[132..140].iter().all(|b| *b == 0));
        assert_eq!((64..128).collect::<Vec<u8>>(), &contents[140..]);
    }

    #[test]
    fn large_tail_is_moved_in_chunks() {
        let tail: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut raw = vec![0xEE; 100];
        raw.extend_from_slice(&tail);
        let mut region = TagRegion::with_padding(io::Cursor::new(raw), 100..100, 0);
        {
            let mut writer = region.writer().unwrap();
            writer.write_all(&[0xCC; 5000]).unwrap();
            writer.flush().unwrap();
        }
        let contents = region.into_inner().into_inner();
        assert_eq!(100 + 5000 + 40_000, contents.len());
        assert_eq!(&tail[..], &contents[5100..]);
    }

    #[test]
    fn empty_region_at_start_of_file() {
        let mut region = TagRegion::with_padding(io::Cursor::new(vec![1, 2, 3, 4]), 0..0, 0);
        {
            let mut writer = region.writer().unwrap();
            writer.write_all(b"TAG?").unwrap();
            writer.flush().unwrap();
        }
        let contents = region.into_inner().into_inner();
        assert_eq!(b"TAG?\x01\x02\x03\x04".to_vec(), contents);
    }
}
