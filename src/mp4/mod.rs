//! MP4 (ISO-BMFF) container support.
//!
//! The tag lives in `moov.udta.meta.ilst`. Rewriting replaces that `meta` atom and streams every
//! other top-level atom through unchanged; when the rewritten `moov` changes size and an `mdat`
//! follows it, every `stco`/`co64` chunk offset is shifted by the size delta so the references
//! into the audio data stay valid.

pub mod atom;
pub mod tag;

pub use atom::{Atom, AtomRef, AtomTree};
pub use tag::{Mp4Field, Mp4Tag, Mp4TagMaker};

use crate::diag::Diagnostics;
use crate::mp4::atom::{copy_atom, ids};
use crate::{Error, ErrorKind};
use std::io::{Read, Seek, SeekFrom, Write};

const MAKE_CONTEXT: &str = "making MP4 container";

/// Reads the tag of the file behind `reader`.
pub fn read_tag(
    mut reader: impl Read + Seek,
    diag: &mut Diagnostics,
) -> crate::Result<Mp4Tag> {
    let end = reader.seek(SeekFrom::End(0))?;
    let mut tree = AtomTree::parse(&mut reader, 0, end)?;
    let meta = tree
        .find_path(&mut reader, &[ids::MOOV, ids::UDTA, ids::META])?
        .ok_or_else(|| Error::new(ErrorKind::NoDataFound, "file contains no MP4 tag"))?;
    Mp4Tag::parse(reader, &mut tree, meta, diag)
}

/// Copies the file behind `reader` to `writer` with `tag` as its only `moov.udta.meta` tag.
///
/// Audio data is copied bit for bit. The `moov` atom is rebuilt in memory; all other top-level
/// atoms keep their order and content.
pub fn rewrite_tag(
    mut reader: impl Read + Seek,
    mut writer: impl Write,
    tag: &Mp4Tag,
    diag: &mut Diagnostics,
) -> crate::Result<()> {
    let end = reader.seek(SeekFrom::End(0))?;
    let mut tree = AtomTree::parse(&mut reader, 0, end)?;
    let moov = tree
        .roots()
        .into_iter()
        .find(|r| tree.get(*r).id == ids::MOOV)
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "file contains no moov atom"))?;
    let old_moov = tree.get(moov).clone();

    let mut meta_bytes = Vec::new();
    tag.make(&mut meta_bytes, diag)?;

    let mut payload = Vec::new();
    let mut replaced = false;
    for child in tree.children(&mut reader, moov)? {
        let child_atom = tree.get(child).clone();
        if child_atom.id == ids::UDTA {
            payload.extend_from_slice(&rebuild_udta(
                &mut reader,
                &mut tree,
                child,
                &meta_bytes,
            )?);
            replaced = true;
        } else {
            reader.seek(SeekFrom::Start(child_atom.start))?;
            let mut raw = vec![0; child_atom.total_size as usize];
            reader.read_exact(&mut raw)?;
            payload.extend_from_slice(&raw);
        }
    }
    if !replaced {
        payload.extend_from_slice(&wrap_atom(ids::UDTA, &meta_bytes));
    }
    let mut new_moov = wrap_atom(ids::MOOV, &payload);

    let delta = new_moov.len() as i64 - old_moov.total_size as i64;
    if delta != 0 {
        diag.info(
            MAKE_CONTEXT,
            format!("moov atom size changes by {} bytes; chunk offsets are shifted.", delta),
        );
        let len = new_moov.len();
        patch_chunk_offsets(&mut new_moov, 8, len, old_moov.end(), delta)?;
    }

    for root in tree.roots() {
        let atom = tree.get(root).clone();
        if atom.start == old_moov.start {
            writer.write_all(&new_moov)?;
        } else {
            copy_atom(&mut reader, &mut writer, &atom)?;
        }
    }
    Ok(())
}

fn rebuild_udta(
    mut reader: impl Read + Seek,
    tree: &mut AtomTree,
    udta: AtomRef,
    meta_bytes: &[u8],
) -> crate::Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut replaced = false;
    for child in tree.children(&mut reader, udta)? {
        let child_atom = tree.get(child).clone();
        if child_atom.id == ids::META {
            // Only the first meta atom is kept; further ones would shadow the rewritten tag.
            if !replaced {
                payload.extend_from_slice(meta_bytes);
                replaced = true;
            }
        } else {
            reader.seek(SeekFrom::Start(child_atom.start))?;
            let mut raw = vec![0; child_atom.total_size as usize];
            reader.read_exact(&mut raw)?;
            payload.extend_from_slice(&raw);
        }
    }
    if !replaced {
        payload.extend_from_slice(meta_bytes);
    }
    Ok(wrap_atom(ids::UDTA, &payload))
}

fn wrap_atom(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Walks the atom structure inside `buf[start..end]` and shifts every `stco`/`co64` entry
/// referring to data past `threshold` by `delta`.
fn patch_chunk_offsets(
    buf: &mut [u8],
    start: usize,
    end: usize,
    threshold: u64,
    delta: i64,
) -> crate::Result<()> {
    let mut offset = start;
    while offset + 8 <= end {
        let size = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        let id = u32::from_be_bytes(buf[offset + 4..offset + 8].try_into().unwrap());
        if size < 8 || offset + size > end {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "atom size exceeds its parent",
            ));
        }
        match id {
            ids::TRAK | ids::MDIA | ids::MINF | ids::STBL => {
                patch_chunk_offsets(buf, offset + 8, offset + size, threshold, delta)?;
            }
            ids::STCO if size >= 16 => {
                let count =
                    u32::from_be_bytes(buf[offset + 12..offset + 16].try_into().unwrap()) as usize;
                for i in 0..count.min((size - 16) / 4) {
                    let at = offset + 16 + i * 4;
                    let entry = u32::from_be_bytes(buf[at..at + 4].try_into().unwrap());
                    if u64::from(entry) >= threshold {
                        let shifted = i64::from(entry) + delta;
                        let shifted = u32::try_from(shifted).map_err(|_| {
                            Error::new(ErrorKind::InvalidData, "chunk offset overflows 32 bits")
                        })?;
                        buf[at..at + 4].copy_from_slice(&shifted.to_be_bytes());
                    }
                }
            }
            ids::CO64 if size >= 16 => {
                let count =
                    u32::from_be_bytes(buf[offset + 12..offset + 16].try_into().unwrap()) as usize;
                for i in 0..count.min((size - 16) / 8) {
                    let at = offset + 16 + i * 8;
                    let entry = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
                    if entry >= threshold {
                        let shifted = (entry as i64 + delta) as u64;
                        buf[at..at + 8].copy_from_slice(&shifted.to_be_bytes());
                    }
                }
            }
            _ => {}
        }
        offset += size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{KnownField, Tag};
    use crate::value::TagValue;
    use std::io::Cursor;

    fn atom_bytes(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        wrap_atom(u32::from_be_bytes(*id), payload)
    }

    fn build_file(tag_meta: Option<&[u8]>, mdat_payload: &[u8], chunk_offset: u32) -> Vec<u8> {
        let mut stco_payload = vec![0, 0, 0, 0, 0, 0, 0, 1];
        stco_payload.extend_from_slice(&chunk_offset.to_be_bytes());
        let stco = atom_bytes(b"stco", &stco_payload);
        let trak = atom_bytes(
            b"trak",
            &atom_bytes(b"mdia", &atom_bytes(b"minf", &atom_bytes(b"stbl", &stco))),
        );
        let mut moov_payload = trak;
        if let Some(meta) = tag_meta {
            moov_payload.extend_from_slice(&atom_bytes(b"udta", meta));
        }
        let moov = atom_bytes(b"moov", &moov_payload);
        let mut file = atom_bytes(b"ftyp", b"M4A \x00\x00\x02\x00");
        file.extend_from_slice(&moov);
        file.extend_from_slice(&atom_bytes(b"mdat", mdat_payload));
        file
    }

    #[test]
    fn rewrite_patches_chunk_offsets() {
        // The single chunk starts right at the mdat payload.
        let mut probe = build_file(None, b"audio-frames", 0);
        let mdat_data_offset = (probe.len() - b"audio-frames".len()) as u32;
        probe = build_file(None, b"audio-frames", mdat_data_offset);

        let mut tag = Mp4Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("Patched"));

        let mut out = Vec::new();
        let mut diag = Diagnostics::new();
        rewrite_tag(Cursor::new(probe.clone()), &mut out, &tag, &mut diag).unwrap();

        // The tag must be readable from the rewritten file.
        let reparsed = read_tag(Cursor::new(out.clone()), &mut Diagnostics::new()).unwrap();
        assert_eq!(
            "Patched",
            reparsed.value(KnownField::Title).to_text().unwrap()
        );

        // The audio payload is untouched and the chunk offset points at it again.
        let audio_at = out
            .windows(b"audio-frames".len())
            .position(|w| w == b"audio-frames")
            .unwrap() as u32;
        let stco_at = out.windows(4).position(|w| w == b"stco").unwrap();
        let entry = u32::from_be_bytes(out[stco_at + 12..stco_at + 16].try_into().unwrap());
        assert_eq!(audio_at, entry);
    }

    #[test]
    fn rewrite_keeps_offsets_when_size_is_unchanged() {
        let mut tag = Mp4Tag::new();
        tag.set_value(KnownField::Title, TagValue::text("T"));
        let mut meta = Vec::new();
        tag.make(&mut meta, &mut Diagnostics::new()).unwrap();

        let mut probe = build_file(Some(&meta), b"frames", 0);
        let mdat_data_offset = (probe.len() - b"frames".len()) as u32;
        probe = build_file(Some(&meta), b"frames", mdat_data_offset);

        // Rewriting with a same-size title leaves every offset alone.
        let mut same = Mp4Tag::new();
        same.set_value(KnownField::Title, TagValue::text("X"));
        let mut out = Vec::new();
        let mut diag = Diagnostics::new();
        rewrite_tag(Cursor::new(probe.clone()), &mut out, &same, &mut diag).unwrap();
        assert_eq!(probe.len(), out.len());
        let stco_at = out.windows(4).position(|w| w == b"stco").unwrap();
        let entry = u32::from_be_bytes(out[stco_at + 12..stco_at + 16].try_into().unwrap());
        assert_eq!(mdat_data_offset, entry);
    }

    #[test]
    fn read_tag_without_tag_reports_no_data() {
        let file = build_file(None, b"audio", 0);
        let err = read_tag(Cursor::new(file), &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoDataFound));
    }
}
