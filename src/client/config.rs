//! Outbound connection configuration

use std::time::Duration;

use crate::protocol::constants::{MAX_CHUNK_SIZE, RECOMMENDED_CHUNK_SIZE};

/// Outbound RTMP connection options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundConfig {
    /// DNS lookup + TCP connect + handshake must finish within this time
    pub connect_timeout: Duration,

    /// Time allowed for the server to answer a command
    pub command_timeout: Duration,

    /// Chunk size announced to the target server
    pub chunk_size: u32,

    /// Publish several streams over one connection per (host, port, app)
    pub reuse_connections: bool,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Frames queued per forwarded stream before the slowest are dropped
    pub forward_queue: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            reuse_connections: true,
            tcp_nodelay: true,
            forward_queue: 256,
        }
    }
}

impl OutboundConfig {
    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set chunk size, capped at the protocol maximum
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Enable or disable connection reuse
    pub fn reuse_connections(mut self, reuse: bool) -> Self {
        self.reuse_connections = reuse;
        self
    }
}
