//! Traversal of the ISO-BMFF atom tree.
//!
//! Atoms are kept in an arena ([`AtomTree`]) and addressed by index handles ([`AtomRef`]);
//! children are parsed on demand and traversal is bounded by the parent's total size. This keeps
//! re-entry cheap and avoids ownership cycles between parents and children.

use crate::{Error, ErrorKind};
use log::debug;
use std::io::{self, Read, Seek, SeekFrom};

/// Builds a 32-bit FourCC from its ASCII spelling.
pub const fn fourcc(id: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*id)
}

/// Renders a FourCC for diagnostics.
pub fn fourcc_to_string(id: u32) -> String {
    id.to_be_bytes()
        .iter()
        .map(|b| {
            if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            }
        })
        .collect()
}

/// FourCCs of the atoms the engine traverses.
pub mod ids {
    #![allow(missing_docs)]

    use super::fourcc;

    pub const FTYP: u32 = fourcc(b"ftyp");
    pub const MOOV: u32 = fourcc(b"moov");
    pub const MDAT: u32 = fourcc(b"mdat");
    pub const FREE: u32 = fourcc(b"free");
    pub const UDTA: u32 = fourcc(b"udta");
    pub const META: u32 = fourcc(b"meta");
    pub const HDLR: u32 = fourcc(b"hdlr");
    pub const ILST: u32 = fourcc(b"ilst");
    pub const TRAK: u32 = fourcc(b"trak");
    pub const MDIA: u32 = fourcc(b"mdia");
    pub const MINF: u32 = fourcc(b"minf");
    pub const STBL: u32 = fourcc(b"stbl");
    pub const STCO: u32 = fourcc(b"stco");
    pub const CO64: u32 = fourcc(b"co64");
    pub const MEAN: u32 = fourcc(b"mean");
    pub const NAME: u32 = fourcc(b"name");
    pub const DATA: u32 = fourcc(b"data");
    /// The iTunes freeform atom, `----`.
    pub const EXTENDED: u32 = fourcc(b"----");
}

/// A single atom: its identity and where it lives on disk.
#[derive(Clone, Debug)]
pub struct Atom {
    /// The FourCC of the atom.
    pub id: u32,
    /// The absolute offset of the size field.
    pub start: u64,
    /// 8, or 16 when the 64-bit size extension is used.
    pub header_size: u8,
    /// The total size including the header.
    pub total_size: u64,
    children: Option<Vec<usize>>,
}

impl Atom {
    /// The absolute offset of the atom's payload.
    pub fn data_offset(&self) -> u64 {
        self.start + u64::from(self.header_size)
    }

    /// The size of the atom's payload.
    pub fn data_size(&self) -> u64 {
        self.total_size - u64::from(self.header_size)
    }

    /// The absolute offset of the first byte after the atom.
    pub fn end(&self) -> u64 {
        self.start + self.total_size
    }
}

/// An index handle into an [`AtomTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtomRef(usize);

/// The arena of parsed atoms.
#[derive(Clone, Debug, Default)]
pub struct AtomTree {
    atoms: Vec<Atom>,
    roots: Vec<usize>,
}

impl AtomTree {
    /// Parses the headers of all top-level atoms between `start` and `end`.
    pub fn parse(
        mut reader: impl Read + Seek,
        start: u64,
        end: u64,
    ) -> crate::Result<AtomTree> {
        let mut tree = AtomTree::default();
        let mut offset = start;
        while offset < end {
            let atom = read_atom_header(&mut reader, offset, end)?;
            offset = atom.end();
            tree.atoms.push(atom);
            tree.roots.push(tree.atoms.len() - 1);
        }
        Ok(tree)
    }

    /// The top-level atoms in file order.
    pub fn roots(&self) -> Vec<AtomRef> {
        self.roots.iter().map(|i| AtomRef(*i)).collect()
    }

    /// Returns the atom behind a handle.
    pub fn get(&self, atom: AtomRef) -> &Atom {
        &self.atoms[atom.0]
    }

    /// Returns the children of `parent`, parsing their headers on first access.
    pub fn children(
        &mut self,
        mut reader: impl Read + Seek,
        parent: AtomRef,
    ) -> crate::Result<Vec<AtomRef>> {
        if let Some(children) = &self.atoms[parent.0].children {
            return Ok(children.iter().map(|i| AtomRef(*i)).collect());
        }
        let (mut offset, end) = {
            let atom = &self.atoms[parent.0];
            let mut offset = atom.data_offset();
            // Apple's `meta` atom carries a 4-byte version/flags block before its children;
            // tolerate both its presence and its absence.
            if atom.id == ids::META {
                offset += meta_version_size(&mut reader, offset, atom.end())?;
            }
            (offset, atom.end())
        };
        let mut children = Vec::new();
        while offset < end {
            let child = read_atom_header(&mut reader, offset, end)?;
            offset = child.end();
            self.atoms.push(child);
            children.push(self.atoms.len() - 1);
        }
        self.atoms[parent.0].children = Some(children.clone());
        Ok(children.into_iter().map(AtomRef).collect())
    }

    /// Streams the children of `parent` and returns the first one with the given id.
    pub fn child_by_id(
        &mut self,
        reader: impl Read + Seek,
        parent: AtomRef,
        id: u32,
    ) -> crate::Result<Option<AtomRef>> {
        Ok(self
            .children(reader, parent)?
            .into_iter()
            .find(|child| self.get(*child).id == id))
    }

    /// Descends along `path` starting at the top level, e.g. `[MOOV, UDTA, META]`.
    pub fn find_path(
        &mut self,
        mut reader: impl Read + Seek,
        path: &[u32],
    ) -> crate::Result<Option<AtomRef>> {
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        let mut current = match self.roots().into_iter().find(|r| self.get(*r).id == *first) {
            Some(root) => root,
            None => return Ok(None),
        };
        for id in rest {
            current = match self.child_by_id(&mut reader, current, *id)? {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }
}

/// Returns 4 when a version/flags block precedes the children of a `meta` atom, 0 otherwise.
fn meta_version_size(
    mut reader: impl Read + Seek,
    offset: u64,
    end: u64,
) -> crate::Result<u64> {
    if offset + 8 > end {
        return Ok(0);
    }
    reader.seek(SeekFrom::Start(offset))?;
    let mut peek = [0; 8];
    reader.read_exact(&mut peek)?;
    let size = u64::from(u32::from_be_bytes(peek[0..4].try_into().unwrap()));
    let id = &peek[4..8];
    let plausible_child = size >= 8
        && offset + size <= end
        && id.iter().all(|b| b.is_ascii_graphic() || *b == 0xA9);
    Ok(if plausible_child { 0 } else { 4 })
}

fn read_atom_header(
    mut reader: impl Read + Seek,
    start: u64,
    parent_end: u64,
) -> crate::Result<Atom> {
    reader.seek(SeekFrom::Start(start))?;
    let mut header = [0; 8];
    reader.read_exact(&mut header)?;
    let short_size = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let id = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let (total_size, header_size) = match short_size {
        // Extends to the end of the parent (or the file at top level).
        0 => (parent_end - start, 8),
        1 => {
            let mut large = [0; 8];
            reader.read_exact(&mut large)?;
            (u64::from_be_bytes(large), 16)
        }
        n => (u64::from(n), 8),
    };
    if total_size < u64::from(header_size) || start + total_size > parent_end {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "atom size exceeds its parent",
        ));
    }
    debug!(
        "atom {} at {}, {} bytes",
        fourcc_to_string(id),
        start,
        total_size
    );
    Ok(Atom {
        id,
        start,
        header_size,
        total_size,
        children: None,
    })
}

/// Reads the payload of an atom into memory.
pub fn read_data(
    mut reader: impl Read + Seek,
    atom: &Atom,
) -> crate::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(atom.data_offset()))?;
    let mut data = vec![0; atom.data_size() as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Copies the whole atom, header included, to `writer`.
pub fn copy_atom(
    mut reader: impl Read + Seek,
    mut writer: impl io::Write,
    atom: &Atom,
) -> crate::Result<()> {
    reader.seek(SeekFrom::Start(atom.start))?;
    let copied = io::copy(&mut reader.take(atom.total_size), &mut writer)?;
    if copied < atom.total_size {
        return Err(Error::new(ErrorKind::TruncatedData, "atom is truncated"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn atom_bytes(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_nested_atoms() {
        let udta = atom_bytes(b"udta", &atom_bytes(b"meta", &[]));
        let moov = atom_bytes(b"moov", &udta);
        let mut file = atom_bytes(b"ftyp", b"M4A \x00\x00\x02\x00");
        file.extend_from_slice(&moov);

        let mut reader = Cursor::new(file.clone());
        let mut tree = AtomTree::parse(&mut reader, 0, file.len() as u64).unwrap();
        let roots = tree.roots();
        assert_eq!(2, roots.len());
        assert_eq!(ids::FTYP, tree.get(roots[0]).id);
        assert_eq!(ids::MOOV, tree.get(roots[1]).id);

        let meta = tree
            .find_path(&mut reader, &[ids::MOOV, ids::UDTA, ids::META])
            .unwrap()
            .unwrap();
        assert_eq!(8, tree.get(meta).total_size);
    }

    #[test]
    fn large_size_header() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.extend_from_slice(b"mdat");
        raw.extend_from_slice(&24u64.to_be_bytes());
        raw.extend_from_slice(&[0; 8]);
        let tree = AtomTree::parse(Cursor::new(raw.clone()), 0, raw.len() as u64).unwrap();
        let atom = tree.get(tree.roots()[0]);
        assert_eq!(16, atom.header_size);
        assert_eq!(24, atom.total_size);
        assert_eq!(8, atom.data_size());
    }

    #[test]
    fn meta_version_block_is_tolerated() {
        // With the 4-byte version/flags block.
        let mut meta_payload = vec![0, 0, 0, 0];
        meta_payload.extend_from_slice(&atom_bytes(b"ilst", &[]));
        let with_version = atom_bytes(b"meta", &meta_payload);
        let mut reader = Cursor::new(with_version.clone());
        let mut tree = AtomTree::parse(&mut reader, 0, with_version.len() as u64).unwrap();
        let meta = tree.roots()[0];
        let children = tree.children(&mut reader, meta).unwrap();
        assert_eq!(1, children.len());
        assert_eq!(ids::ILST, tree.get(children[0]).id);

        // Without it.
        let without_version = atom_bytes(b"meta", &atom_bytes(b"ilst", &[]));
        let mut reader = Cursor::new(without_version.clone());
        let mut tree = AtomTree::parse(&mut reader, 0, without_version.len() as u64).unwrap();
        let meta = tree.roots()[0];
        let children = tree.children(&mut reader, meta).unwrap();
        assert_eq!(1, children.len());
        assert_eq!(ids::ILST, tree.get(children[0]).id);
    }

    #[test]
    fn oversized_atom_is_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(b"moov");
        raw.extend_from_slice(&[0; 8]);
        let err = AtomTree::parse(Cursor::new(raw.clone()), 0, raw.len() as u64).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidData));
    }
}
