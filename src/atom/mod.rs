//! MP4-family atom (box) parsing
//!
//! Atoms are typed, length-prefixed records that nest to form the structure of
//! MP4/MOV/F4V files. This module decodes them into an owned tree:
//!
//! ```text
//! moov
//!     mvhd            <- versioned: 1 byte version + 3 bytes flags
//!     trak
//!         tkhd
//!         mdia
//!             mdhd
//! ```
//!
//! Only structure is decoded; sample payloads stay opaque `Bytes`.

pub mod fourcc;
pub mod node;
pub mod reader;

pub use fourcc::FourCC;
pub use node::{render_hierarchy, Atom, AtomDetails, FileType};
pub use reader::{AtomHeader, AtomReader};
