//! Four-character atom type codes

use std::fmt;

/// Four-character code identifying an atom type (e.g. `moov`, `mvhd`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const FTYP: FourCC = FourCC(*b"ftyp");
    pub const MOOV: FourCC = FourCC(*b"moov");
    pub const MVHD: FourCC = FourCC(*b"mvhd");
    pub const TRAK: FourCC = FourCC(*b"trak");
    pub const TKHD: FourCC = FourCC(*b"tkhd");
    pub const MDIA: FourCC = FourCC(*b"mdia");
    pub const MDHD: FourCC = FourCC(*b"mdhd");
    pub const HDLR: FourCC = FourCC(*b"hdlr");
    pub const MINF: FourCC = FourCC(*b"minf");
    pub const STBL: FourCC = FourCC(*b"stbl");
    pub const STSD: FourCC = FourCC(*b"stsd");
    pub const DREF: FourCC = FourCC(*b"dref");
    pub const META: FourCC = FourCC(*b"meta");
    pub const MDAT: FourCC = FourCC(*b"mdat");
    pub const FREE: FourCC = FourCC(*b"free");

    /// Build from a big-endian `u32` as stored on the wire
    pub fn from_u32(v: u32) -> Self {
        FourCC(v.to_be_bytes())
    }

    /// Big-endian `u32` form
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Atoms whose body is nothing but child atoms
    pub fn is_container(&self) -> bool {
        matches!(
            &self.0,
            b"moov"
                | b"trak"
                | b"mdia"
                | b"minf"
                | b"stbl"
                | b"dinf"
                | b"edts"
                | b"udta"
                | b"mvex"
                | b"moof"
                | b"traf"
                | b"mfra"
        )
    }

    /// Atoms carrying a 1-byte version and 3-byte flags field after the header
    pub fn is_versioned(&self) -> bool {
        matches!(
            &self.0,
            b"mvhd"
                | b"tkhd"
                | b"mdhd"
                | b"hdlr"
                | b"vmhd"
                | b"smhd"
                | b"dref"
                | b"stsd"
                | b"stts"
                | b"ctts"
                | b"stss"
                | b"stsc"
                | b"stsz"
                | b"stco"
                | b"co64"
                | b"elst"
                | b"mehd"
                | b"trex"
                | b"mfhd"
                | b"tfhd"
                | b"tfdt"
                | b"trun"
                | b"meta"
        )
    }

    /// Versioned atoms whose payload is a u32 entry count followed by child atoms
    pub fn has_entry_children(&self) -> bool {
        matches!(&self.0, b"stsd" | b"dref")
    }

    /// Versioned atoms whose payload is child atoms
    pub fn has_versioned_children(&self) -> bool {
        *self == FourCC::META
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(b: [u8; 4]) -> Self {
        FourCC(b)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", self.as_u32())
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}
