//! Atom reader
//!
//! Decodes atoms from a byte buffer. Every atom is read inside a slice bounded
//! by its declared size, so a payload reader can never run into the next
//! sibling; after each atom the cursor moves to `start + declared_size`
//! regardless of how much of the body was understood.
//!
//! Header layout:
//! ```text
//! +-----------+-----------+---------------------------+
//! | size (4)  | type (4)  | [extended size (8)]       |
//! +-----------+-----------+---------------------------+
//! size == 1: 64-bit size follows the type
//! size == 0: atom extends to the end of its container
//! ```

use std::io::Read;

use bytes::{Buf, Bytes};

use super::fourcc::FourCC;
use super::node::{Atom, AtomDetails, FileType};
use crate::error::AtomError;

const BASE_HEADER_LEN: u64 = 8;
const EXTENDED_HEADER_LEN: u64 = 16;
const VERSION_FLAGS_LEN: u64 = 4;

const SIZE_TO_END: u32 = 0;
const SIZE_EXTENDED: u32 = 1;

/// Deepest container nesting followed before giving up
const MAX_DEPTH: usize = 64;

/// Decoded atom header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    pub kind: FourCC,
    /// Total atom size including the header, with size 0 already resolved
    pub declared_size: u64,
    pub extends_to_end: bool,
    pub start_offset: u64,
    pub header_len: u8,
}

impl AtomHeader {
    /// Smallest declared size that can hold this atom's fixed fields
    pub fn minimum_size(&self) -> u64 {
        let fixed = u64::from(self.header_len);
        if self.kind.is_versioned() {
            fixed + VERSION_FLAGS_LEN
        } else {
            fixed
        }
    }
}

/// Cursor over a buffer of sibling atoms
pub struct AtomReader {
    data: Bytes,
    pos: usize,
    /// Absolute offset of `data[0]` in the original source
    base_offset: u64,
}

impl AtomReader {
    /// Reader over a whole container buffer
    pub fn new(data: Bytes) -> Self {
        Self::nested(data, 0)
    }

    /// Drain a sequential source and read from the collected bytes
    pub fn from_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Self::new(Bytes::from(buf)))
    }

    fn nested(data: Bytes, base_offset: u64) -> Self {
        Self {
            data,
            pos: 0,
            base_offset,
        }
    }

    /// Absolute offset of the cursor
    pub fn position(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the cursor reached the end of the buffer
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Move the cursor to an absolute offset inside this reader's buffer
    pub fn seek(&mut self, offset: u64) -> Result<(), AtomError> {
        let end = self.base_offset + self.data.len() as u64;
        if offset < self.base_offset || offset > end {
            return Err(AtomError::Truncated {
                offset,
                needed: 0,
                available: 0,
            });
        }
        self.pos = (offset - self.base_offset) as usize;
        Ok(())
    }

    /// Decode the header at the cursor without consuming it
    pub fn peek_header(&self) -> Result<AtomHeader, AtomError> {
        let start_offset = self.position();
        let available = self.remaining() as u64;
        if available < BASE_HEADER_LEN {
            return Err(AtomError::Truncated {
                offset: start_offset,
                needed: BASE_HEADER_LEN,
                available,
            });
        }

        let mut buf = &self.data[self.pos..];
        let size = buf.get_u32();
        let kind = FourCC::from_u32(buf.get_u32());

        let (declared_size, header_len, extends_to_end) = match size {
            SIZE_EXTENDED => {
                if available < EXTENDED_HEADER_LEN {
                    return Err(AtomError::Truncated {
                        offset: start_offset,
                        needed: EXTENDED_HEADER_LEN,
                        available,
                    });
                }
                (buf.get_u64(), EXTENDED_HEADER_LEN as u8, false)
            }
            SIZE_TO_END => (available, BASE_HEADER_LEN as u8, true),
            n => (u64::from(n), BASE_HEADER_LEN as u8, false),
        };

        let header = AtomHeader {
            kind,
            declared_size,
            extends_to_end,
            start_offset,
            header_len,
        };

        let minimum = header.minimum_size();
        if declared_size < minimum {
            return Err(AtomError::SizeTooSmall {
                kind: kind.to_string(),
                offset: start_offset,
                declared: declared_size,
                minimum,
            });
        }

        Ok(header)
    }

    /// Consume the next atom's header and body, leaving the cursor on the next sibling
    fn next_raw(&mut self) -> Result<(AtomHeader, Bytes), AtomError> {
        let header = self.peek_header()?;
        let size = usize::try_from(header.declared_size).map_err(|_| AtomError::SizeOverflow {
            offset: header.start_offset,
            declared: header.declared_size,
        })?;

        if size > self.remaining() {
            return Err(AtomError::Truncated {
                offset: header.start_offset,
                needed: header.declared_size,
                available: self.remaining() as u64,
            });
        }

        let body = self
            .data
            .slice(self.pos + usize::from(header.header_len)..self.pos + size);
        self.pos += size;
        Ok((header, body))
    }

    /// Read the atom at the cursor, including all of its descendants
    pub fn read_atom(&mut self) -> Result<Atom, AtomError> {
        let (header, body) = self.next_raw()?;
        parse_body(header, body, 0)
    }

    /// Read every remaining sibling, failing on the first error
    pub fn read_all(&mut self) -> Result<Vec<Atom>, AtomError> {
        let mut atoms = Vec::new();
        while !self.is_empty() {
            atoms.push(self.read_atom()?);
        }
        Ok(atoms)
    }

    /// Read every remaining sibling, skipping atoms whose body fails to parse
    ///
    /// A broken subtree is reported and the cursor resynchronizes on the next
    /// sibling using the declared size. Header-level failures (truncated input,
    /// impossible sizes) end the scan since no sibling boundary is known.
    pub fn read_all_lenient(&mut self) -> (Vec<Atom>, Vec<AtomError>) {
        let mut atoms = Vec::new();
        let mut errors = Vec::new();

        while !self.is_empty() {
            let (header, body) = match self.next_raw() {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(offset = self.position(), error = %e, "Stopping atom scan");
                    errors.push(e);
                    break;
                }
            };

            match parse_body(header, body, 0) {
                Ok(atom) => atoms.push(atom),
                Err(e) => {
                    tracing::warn!(
                        kind = %header.kind,
                        offset = header.start_offset,
                        error = %e,
                        "Skipping malformed atom"
                    );
                    errors.push(e);
                }
            }
        }

        (atoms, errors)
    }
}

/// Decode an atom body (everything after the header)
fn parse_body(header: AtomHeader, mut body: Bytes, depth: usize) -> Result<Atom, AtomError> {
    if depth > MAX_DEPTH {
        return Err(AtomError::TooDeep {
            offset: header.start_offset,
        });
    }
    let kind = header.kind;
    let mut offset = header.start_offset + u64::from(header.header_len);

    let mut atom = Atom {
        kind,
        declared_size: header.declared_size,
        extends_to_end: header.extends_to_end,
        start_offset: header.start_offset,
        header_len: header.header_len,
        version: None,
        flags: None,
        details: AtomDetails::None,
        children: Vec::new(),
        payload: Bytes::new(),
    };

    if kind.is_versioned() {
        ensure(&body, VERSION_FLAGS_LEN, offset)?;
        atom.version = Some(body.get_u8());
        let mut flags = [0u8; 3];
        body.copy_to_slice(&mut flags);
        atom.flags = Some(flags);
        offset += VERSION_FLAGS_LEN;
    }

    if kind.is_container() || kind.has_versioned_children() {
        let (children, rest) = read_children(kind, body, offset, depth)?;
        atom.children = children;
        atom.payload = rest;
    } else if kind.has_entry_children() {
        ensure(&body, 4, offset)?;
        let count = body.get_u32();
        let (children, rest) = read_children(kind, body, offset + 4, depth)?;
        if children.len() != count as usize {
            tracing::warn!(
                kind = %kind,
                offset = header.start_offset,
                declared = count,
                found = children.len(),
                "Entry count does not match child atoms"
            );
        }
        atom.details = AtomDetails::EntryCount(count);
        atom.children = children;
        atom.payload = rest;
    } else if kind == FourCC::FTYP {
        ensure(&body, 8, offset)?;
        let major_brand = FourCC::from_u32(body.get_u32());
        let minor_version = body.get_u32();
        let mut compatible_brands = Vec::with_capacity(body.remaining() / 4);
        while body.remaining() >= 4 {
            compatible_brands.push(FourCC::from_u32(body.get_u32()));
        }
        if body.has_remaining() {
            report_leftover(kind, header.start_offset, body.remaining());
        }
        atom.details = AtomDetails::FileType(FileType {
            major_brand,
            minor_version,
            compatible_brands,
        });
        atom.payload = body;
    } else {
        atom.payload = body;
    }

    Ok(atom)
}

/// Decode the child atoms packed into a parent's body
///
/// Returns the children and any trailing bytes too short to be an atom.
fn read_children(
    parent: FourCC,
    body: Bytes,
    base_offset: u64,
    depth: usize,
) -> Result<(Vec<Atom>, Bytes), AtomError> {
    let mut reader = AtomReader::nested(body, base_offset);
    let mut children = Vec::new();

    while reader.remaining() >= BASE_HEADER_LEN as usize {
        let header = reader.peek_header()?;
        if header.declared_size > reader.remaining() as u64 {
            return Err(AtomError::ChildOverrun {
                parent: parent.to_string(),
                child: header.kind.to_string(),
                offset: header.start_offset,
            });
        }
        let (child, child_body) = reader.next_raw()?;
        children.push(parse_body(child, child_body, depth + 1)?);
    }

    let rest = reader.data.slice(reader.pos..);
    if !rest.is_empty() {
        report_leftover(parent, reader.position(), rest.len());
    }
    Ok((children, rest))
}

fn ensure(body: &Bytes, needed: u64, offset: u64) -> Result<(), AtomError> {
    let available = body.remaining() as u64;
    if available < needed {
        return Err(AtomError::Truncated {
            offset,
            needed,
            available,
        });
    }
    Ok(())
}

fn report_leftover(kind: FourCC, offset: u64, len: usize) {
    tracing::debug!(
        kind = %kind,
        offset = offset,
        unread = len,
        "Atom body not fully consumed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom_bytes(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn versioned_sample() -> Vec<u8> {
        // 8-byte header + version + flags + 4 payload bytes = 16
        let mut body = vec![0x01, 0x00, 0x01, 0x02];
        body.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        atom_bytes(b"mvhd", &body)
    }

    #[test]
    fn test_versioned_atom() {
        let data = versioned_sample();
        assert_eq!(data.len(), 16);

        let mut reader = AtomReader::new(Bytes::from(data));
        let atom = reader.read_atom().unwrap();

        assert_eq!(atom.kind, FourCC::MVHD);
        assert_eq!(atom.declared_size, 16);
        assert_eq!(atom.header_len, 8);
        assert_eq!(atom.version, Some(1));
        assert_eq!(atom.flags, Some([0x00, 0x01, 0x02]));
        assert_eq!(&atom.payload[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated_versioned_atom_fails() {
        let mut data = versioned_sample();
        data.truncate(10);

        let mut reader = AtomReader::new(Bytes::from(data));
        let result = reader.read_atom();

        assert!(matches!(
            result,
            Err(AtomError::Truncated {
                offset: 0,
                needed: 16,
                available: 10
            })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut reader = AtomReader::new(Bytes::from_static(&[0, 0, 0, 16, b'f']));
        assert!(matches!(
            reader.read_atom(),
            Err(AtomError::Truncated { needed: 8, .. })
        ));
    }

    #[test]
    fn test_size_smaller_than_header() {
        let mut data = vec![0, 0, 0, 4];
        data.extend_from_slice(b"free");
        let mut reader = AtomReader::new(Bytes::from(data));

        assert!(matches!(
            reader.read_atom(),
            Err(AtomError::SizeTooSmall { minimum: 8, .. })
        ));
    }

    #[test]
    fn test_versioned_size_cannot_hold_flags() {
        let mut data = vec![0, 0, 0, 10];
        data.extend_from_slice(b"tkhd");
        data.extend_from_slice(&[0, 0]);
        let mut reader = AtomReader::new(Bytes::from(data));

        assert!(matches!(
            reader.read_atom(),
            Err(AtomError::SizeTooSmall {
                declared: 10,
                minimum: 12,
                ..
            })
        ));
    }

    #[test]
    fn test_extended_size() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[7u8; 8]);

        let mut reader = AtomReader::new(Bytes::from(data));
        let atom = reader.read_atom().unwrap();

        assert_eq!(atom.kind, FourCC::MDAT);
        assert_eq!(atom.header_len, 16);
        assert_eq!(atom.declared_size, 24);
        assert_eq!(atom.payload.len(), 8);
    }

    #[test]
    fn test_size_zero_extends_to_end() {
        let mut data = atom_bytes(b"free", &[]);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[1, 2, 3, 4, 5]);

        let mut reader = AtomReader::new(Bytes::from(data));
        let atoms = reader.read_all().unwrap();

        assert_eq!(atoms.len(), 2);
        assert!(atoms[1].extends_to_end);
        assert_eq!(atoms[1].start_offset, 8);
        assert_eq!(atoms[1].declared_size, 13);
        assert_eq!(&atoms[1].payload[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_nested_children_and_offsets() {
        let tkhd = atom_bytes(b"tkhd", &[0, 0, 0, 7, 0xAA, 0xBB]);
        let trak = atom_bytes(b"trak", &tkhd);
        let mvhd = atom_bytes(b"mvhd", &[0, 0, 0, 0]);
        let mut moov_body = mvhd.clone();
        moov_body.extend_from_slice(&trak);
        let moov = atom_bytes(b"moov", &moov_body);

        let mut reader = AtomReader::new(Bytes::from(moov));
        let atom = reader.read_atom().unwrap();

        assert_eq!(atom.children.len(), 2);
        assert_eq!(atom.children[0].kind, FourCC::MVHD);
        assert_eq!(atom.children[0].start_offset, 8);
        let tkhd = atom.find("trak/tkhd").unwrap();
        assert_eq!(tkhd.start_offset, 8 + 12 + 8);
        assert_eq!(tkhd.flags_value(), Some(7));
        assert_eq!(&tkhd.payload[..], &[0xAA, 0xBB]);

        assert_eq!(atom.hierarchy(0), "moov\n    mvhd\n    trak\n        tkhd");
    }

    #[test]
    fn test_child_overrun_is_error() {
        // Child claims 32 bytes inside a parent body of 8
        let mut child = vec![0, 0, 0, 32];
        child.extend_from_slice(b"free");
        let moov = atom_bytes(b"moov", &child);

        let mut reader = AtomReader::new(Bytes::from(moov));
        let result = reader.read_atom();

        assert!(matches!(result, Err(AtomError::ChildOverrun { .. })));
    }

    #[test]
    fn test_lenient_scan_resynchronizes() {
        let mut bad_child = vec![0, 0, 0, 32];
        bad_child.extend_from_slice(b"free");
        let mut data = atom_bytes(b"moov", &bad_child);
        data.extend_from_slice(&atom_bytes(b"free", &[1, 2]));

        let mut reader = AtomReader::new(Bytes::from(data));
        let (atoms, errors) = reader.read_all_lenient();

        assert_eq!(errors.len(), 1);
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].kind, FourCC::FREE);
        assert_eq!(atoms[0].start_offset, 16);
    }

    #[test]
    fn test_trailing_bytes_kept_as_payload() {
        let mut body = atom_bytes(b"free", &[]);
        body.extend_from_slice(&[0, 0, 0, 0]);
        let udta = atom_bytes(b"udta", &body);

        let mut reader = AtomReader::new(Bytes::from(udta));
        let atom = reader.read_atom().unwrap();

        assert_eq!(atom.children.len(), 1);
        assert_eq!(atom.payload.len(), 4);
    }

    #[test]
    fn test_ftyp_details() {
        let mut body = Vec::new();
        body.extend_from_slice(b"isom");
        body.extend_from_slice(&512u32.to_be_bytes());
        body.extend_from_slice(b"isom");
        body.extend_from_slice(b"avc1");
        let data = atom_bytes(b"ftyp", &body);

        let mut reader = AtomReader::new(Bytes::from(data));
        let atom = reader.read_atom().unwrap();

        match atom.details {
            AtomDetails::FileType(ftyp) => {
                assert_eq!(ftyp.major_brand, FourCC(*b"isom"));
                assert_eq!(ftyp.minor_version, 512);
                assert_eq!(ftyp.compatible_brands.len(), 2);
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_stsd_entry_count() {
        let entry = atom_bytes(b"avc1", &[0u8; 6]);
        let mut body = vec![0, 0, 0, 0];
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&entry);
        let data = atom_bytes(b"stsd", &body);

        let mut reader = AtomReader::new(Bytes::from(data));
        let atom = reader.read_atom().unwrap();

        assert_eq!(atom.details, AtomDetails::EntryCount(1));
        assert_eq!(atom.children.len(), 1);
        assert_eq!(atom.children[0].kind, FourCC(*b"avc1"));
        assert_eq!(atom.children[0].start_offset, 16);
    }

    #[test]
    fn test_from_reader() {
        let data = versioned_sample();
        let mut reader = AtomReader::from_reader(std::io::Cursor::new(data)).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_seek_to_sibling() {
        let mut data = atom_bytes(b"free", &[9; 4]);
        data.extend_from_slice(&atom_bytes(b"skip", &[]));

        let mut reader = AtomReader::new(Bytes::from(data));
        let header = reader.peek_header().unwrap();
        reader
            .seek(header.start_offset + header.declared_size)
            .unwrap();

        assert_eq!(reader.read_atom().unwrap().kind, FourCC(*b"skip"));
    }

    fn nested_moov(levels: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for _ in 0..levels {
            data = atom_bytes(b"moov", &data);
        }
        data
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let mut data = nested_moov(1_000);
        data.extend_from_slice(&atom_bytes(b"free", &[1, 2]));

        let mut reader = AtomReader::new(Bytes::from(data.clone()));
        assert!(matches!(
            reader.read_atom(),
            Err(AtomError::TooDeep { .. })
        ));

        // The broken subtree is skipped and the sibling still decodes
        let mut reader = AtomReader::new(Bytes::from(data));
        let (atoms, errors) = reader.read_all_lenient();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].kind, FourCC(*b"free"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_moderate_nesting_is_accepted() {
        let mut reader = AtomReader::new(Bytes::from(nested_moov(MAX_DEPTH + 1)));
        let mut atom = reader.read_atom().unwrap();
        let mut depth = 0;
        while let Some(child) = atom.children.pop() {
            atom = child;
            depth += 1;
        }
        assert_eq!(depth, MAX_DEPTH);
    }
}
