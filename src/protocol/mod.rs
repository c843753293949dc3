//! RTMP wire protocol: handshake, chunking and messages

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;
pub mod transport;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, ConnectParams, PublishParams, RtmpMessage};
pub use transport::RtmpTransport;
