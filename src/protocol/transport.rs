//! Message-level RTMP I/O over a byte stream
//!
//! [`RtmpTransport`] owns the chunk codec state of one connection. Protocol
//! control messages (chunk size, window ack size, ping) are handled here and
//! never reach the caller. Replies they require are queued and written before
//! the next outgoing message or on [`RtmpTransport::flush`], so
//! [`RtmpTransport::read_message`] never writes and can sit in a `select!`.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::chunk::{ChunkDecoder, ChunkEncoder};
use super::constants::*;
use super::message::RtmpMessage;
use crate::error::Result;

/// Read buffer size
const READ_CAPACITY: usize = 64 * 1024;

pub struct RtmpTransport<S> {
    io: S,
    read_buf: BytesMut,
    queued: BytesMut,
    scratch: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    bytes_received: u64,
    last_ack: u64,
    window_ack_size: Option<u32>,
}

impl<S> RtmpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `io`; `leftover` holds bytes read past the handshake
    pub fn new(io: S, leftover: BytesMut) -> Self {
        let mut read_buf = BytesMut::with_capacity(READ_CAPACITY);
        read_buf.unsplit(leftover);
        Self {
            io,
            read_buf,
            queued: BytesMut::new(),
            scratch: BytesMut::with_capacity(READ_CAPACITY),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            bytes_received: 0,
            last_ack: 0,
            window_ack_size: None,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Chunk size the peer is sending with
    pub fn peer_chunk_size(&self) -> usize {
        self.decoder.chunk_size()
    }

    /// Encode and write one message, after anything queued
    pub async fn send(&mut self, msg: &RtmpMessage) -> Result<()> {
        self.scratch.clear();
        if !self.queued.is_empty() {
            let queued = self.queued.split();
            self.scratch.unsplit(queued);
        }
        self.encoder.encode(msg, &mut self.scratch);
        self.io.write_all(&self.scratch).await?;
        Ok(())
    }

    /// Announce and switch to a new outgoing chunk size
    pub async fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.send(&RtmpMessage::set_chunk_size(size)).await?;
        self.encoder.set_chunk_size(size);
        Ok(())
    }

    /// Write queued control replies
    pub async fn flush(&mut self) -> Result<()> {
        if !self.queued.is_empty() {
            let queued = self.queued.split();
            self.io.write_all(&queued).await?;
        }
        self.io.flush().await?;
        Ok(())
    }

    /// Next non-control message, or `None` on a clean EOF
    ///
    /// Cancel safe: a dropped call loses no bytes.
    pub async fn read_message(&mut self) -> Result<Option<RtmpMessage>> {
        loop {
            while let Some(msg) = self.decoder.decode(&mut self.read_buf)? {
                if !self.handle_control(&msg)? {
                    return Ok(Some(msg));
                }
            }

            if self.read_buf.capacity() - self.read_buf.len() < 4096 {
                self.read_buf.reserve(READ_CAPACITY);
            }
            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.bytes_received += n as u64;
            self.queue_ack();
        }
    }

    /// Returns true when the message was consumed here
    fn handle_control(&mut self, msg: &RtmpMessage) -> Result<bool> {
        match msg.msg_type {
            MSG_SET_CHUNK_SIZE => {
                if let Some(size) = msg.control_value() {
                    self.decoder.set_chunk_size(size & 0x7FFF_FFFF)?;
                    tracing::trace!(chunk_size = size, "Peer chunk size changed");
                }
                Ok(true)
            }
            MSG_WINDOW_ACK_SIZE => {
                self.window_ack_size = msg.control_value().filter(|w| *w > 0);
                Ok(true)
            }
            MSG_USER_CONTROL => {
                if msg.payload.len() >= 6 {
                    let event = u16::from_be_bytes([msg.payload[0], msg.payload[1]]);
                    if event == UC_PING_REQUEST {
                        let value = u32::from_be_bytes([
                            msg.payload[2],
                            msg.payload[3],
                            msg.payload[4],
                            msg.payload[5],
                        ]);
                        self.queue(&RtmpMessage::user_control(UC_PING_RESPONSE, value));
                    }
                }
                Ok(true)
            }
            MSG_ACKNOWLEDGEMENT | MSG_SET_PEER_BANDWIDTH | MSG_ABORT => Ok(true),
            _ => Ok(false),
        }
    }

    fn queue_ack(&mut self) {
        if let Some(window) = self.window_ack_size {
            if self.bytes_received - self.last_ack >= u64::from(window) {
                self.last_ack = self.bytes_received;
                self.queue(&RtmpMessage::acknowledgement(self.bytes_received as u32));
            }
        }
    }

    fn queue(&mut self, msg: &RtmpMessage) {
        self.encoder.encode(msg, &mut self.queued);
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.io
    }
}
