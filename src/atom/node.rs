//! Decoded atom tree

use bytes::Bytes;

use super::fourcc::FourCC;

/// Decoded `ftyp` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

/// Type-specific fields decoded from an atom's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomDetails {
    /// Nothing beyond the generic fields
    None,
    /// `ftyp` brand information
    FileType(FileType),
    /// Entry count preceding the children of `stsd`/`dref`
    EntryCount(u32),
}

/// A node in the atom tree
///
/// Parents own their children. `payload` holds whatever body bytes were not
/// consumed by the version/flags fields, type-specific fields, or children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Four-character type
    pub kind: FourCC,
    /// Total size in bytes including the header
    pub declared_size: u64,
    /// The size field was 0: the atom runs to the end of its container
    pub extends_to_end: bool,
    /// Absolute offset of the first header byte
    pub start_offset: u64,
    /// 8, or 16 when the 64-bit size extension was used
    pub header_len: u8,
    /// Version byte (versioned atoms only)
    pub version: Option<u8>,
    /// Flags field (versioned atoms only)
    pub flags: Option<[u8; 3]>,
    /// Type-specific decoded fields
    pub details: AtomDetails,
    /// Child atoms in file order
    pub children: Vec<Atom>,
    /// Remaining opaque body bytes
    pub payload: Bytes,
}

impl Atom {
    /// Offset of the first byte after this atom (the next sibling)
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.declared_size
    }

    /// Flags as a 24-bit integer
    pub fn flags_value(&self) -> Option<u32> {
        self.flags
            .map(|f| (u32::from(f[0]) << 16) | (u32::from(f[1]) << 8) | u32::from(f[2]))
    }

    /// Whether this atom carried a version/flags field
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// First direct child of the given type
    pub fn child(&self, kind: FourCC) -> Option<&Atom> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Descendant reached by a `/`-separated type path, e.g. `"trak/mdia/mdhd"`
    pub fn find(&self, path: &str) -> Option<&Atom> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let bytes = segment.as_bytes();
            if bytes.len() != 4 {
                return None;
            }
            let kind = FourCC([bytes[0], bytes[1], bytes[2], bytes[3]]);
            current = current.child(kind)?;
        }
        Some(current)
    }

    /// Indented rendering of this atom and its descendants
    ///
    /// Each level is indented by 4 spaces; one atom per line.
    pub fn hierarchy(&self, depth: usize) -> String {
        let mut out = format!("{}{}", " ".repeat(4 * depth), self.kind);
        for child in &self.children {
            out.push('\n');
            out.push_str(&child.hierarchy(depth + 1));
        }
        out
    }
}

/// Render a list of sibling atoms starting at depth 0
pub fn render_hierarchy(atoms: &[Atom]) -> String {
    atoms
        .iter()
        .map(|a| a.hierarchy(0))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: FourCC) -> Atom {
        Atom {
            kind,
            declared_size: 8,
            extends_to_end: false,
            start_offset: 0,
            header_len: 8,
            version: None,
            flags: None,
            details: AtomDetails::None,
            children: Vec::new(),
            payload: Bytes::new(),
        }
    }

    #[test]
    fn test_hierarchy_indent() {
        let mut mdia = leaf(FourCC::MDIA);
        mdia.children.push(leaf(FourCC::MDHD));
        let mut trak = leaf(FourCC::TRAK);
        trak.children.push(mdia);

        let rendered = trak.hierarchy(0);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines, vec!["trak", "    mdia", "        mdhd"]);
    }

    #[test]
    fn test_hierarchy_depth_two_has_eight_spaces() {
        let atom = leaf(FourCC::MVHD);
        assert_eq!(atom.hierarchy(2), "        mvhd");
    }

    #[test]
    fn test_find_path() {
        let mut mdia = leaf(FourCC::MDIA);
        mdia.children.push(leaf(FourCC::MDHD));
        let mut trak = leaf(FourCC::TRAK);
        trak.children.push(mdia);

        assert_eq!(trak.find("mdia/mdhd").map(|a| a.kind), Some(FourCC::MDHD));
        assert!(trak.find("mdia/hdlr").is_none());
        assert!(trak.find("toolong").is_none());
    }

    #[test]
    fn test_flags_value() {
        let mut atom = leaf(FourCC::TKHD);
        atom.flags = Some([0x00, 0x01, 0x02]);
        assert_eq!(atom.flags_value(), Some(0x0102));
    }
}
