//! Media containers carried through the relay

pub mod flv;

pub use flv::{FlvStreamReader, FlvTag, FlvTagType};
