//! RTMP chunk stream codec
//!
//! Messages are split into chunks of at most `chunk_size` payload bytes:
//!
//! ```text
//! +-------------+----------------+-------------------+--------------+
//! | Basic (1-3) | Message (0-11) | Ext. timestamp (4)| Payload      |
//! +-------------+----------------+-------------------+--------------+
//! fmt 0: timestamp(3) length(3) type(1) stream id(4, little endian)
//! fmt 1: delta(3) length(3) type(1)
//! fmt 2: delta(3)
//! fmt 3: nothing, reuse previous header
//! ```
//!
//! The encoder always emits a full fmt 0 header followed by fmt 3
//! continuations. The decoder handles all four formats.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use super::constants::{DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};
use super::message::RtmpMessage;
use crate::error::ProtocolError;

const MESSAGE_HEADER_LEN: [usize; 4] = [11, 7, 3, 0];

/// Per chunk stream reassembly state
#[derive(Debug, Default)]
struct ChunkStream {
    timestamp: u32,
    delta: u32,
    length: u32,
    msg_type: u8,
    stream_id: u32,
    extended: bool,
    payload: BytesMut,
}

/// Chunk stream decoder
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: usize,
    streams: HashMap<u32, ChunkStream>,
}

enum Progress {
    NeedMore,
    Partial,
    Complete(RtmpMessage),
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as usize,
            streams: HashMap::new(),
        }
    }

    /// Apply a Set Chunk Size received from the peer
    pub fn set_chunk_size(&mut self, size: u32) -> Result<(), ProtocolError> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidChunkSize(size));
        }
        self.chunk_size = size as usize;
        Ok(())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Decode the next complete message from `buf`
    ///
    /// Consumes whole chunks only; returns `Ok(None)` once `buf` holds less
    /// than one chunk.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpMessage>, ProtocolError> {
        loop {
            match self.decode_chunk(buf)? {
                Progress::NeedMore => return Ok(None),
                Progress::Partial => continue,
                Progress::Complete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<Progress, ProtocolError> {
        if buf.is_empty() {
            return Ok(Progress::NeedMore);
        }

        let fmt = buf[0] >> 6;
        let (csid, basic_len) = match buf[0] & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(Progress::NeedMore);
                }
                (64 + u32::from(buf[1]), 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(Progress::NeedMore);
                }
                (64 + u32::from(buf[1]) + u32::from(buf[2]) * 256, 3)
            }
            n => (u32::from(n), 1),
        };

        let header_len = MESSAGE_HEADER_LEN[fmt as usize];
        if buf.len() < basic_len + header_len {
            return Ok(Progress::NeedMore);
        }

        let previous = self.streams.get(&csid);
        if fmt != 0 && previous.is_none() {
            return Err(ProtocolError::UnknownChunkStream(csid));
        }

        let mut header = &buf[basic_len..basic_len + header_len];
        let (mut ts_field, mut length, mut msg_type, mut stream_id) = match previous {
            Some(p) => (p.delta, p.length, p.msg_type, p.stream_id),
            None => (0, 0, 0, 0),
        };
        if fmt <= 2 {
            ts_field = read_u24(&mut header);
        }
        if fmt <= 1 {
            length = read_u24(&mut header);
            msg_type = header.get_u8();
        }
        if fmt == 0 {
            stream_id = header.get_u32_le();
        }

        let extended = if fmt <= 2 {
            ts_field >= EXTENDED_TIMESTAMP
        } else {
            previous.map(|p| p.extended).unwrap_or(false)
        };
        let ext_len = if extended { 4 } else { 0 };
        if buf.len() < basic_len + header_len + ext_len {
            return Ok(Progress::NeedMore);
        }
        if extended {
            let mut ext = &buf[basic_len + header_len..basic_len + header_len + 4];
            ts_field = ext.get_u32();
        } else if fmt == 3 {
            ts_field = previous.map(|p| p.delta).unwrap_or(0);
        }

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        let in_progress = previous.map(|p| p.payload.len()).unwrap_or(0);
        let continuing = fmt == 3 && in_progress > 0;
        let already = if continuing { in_progress } else { 0 };
        let piece = (length as usize - already).min(self.chunk_size);

        let total = basic_len + header_len + ext_len + piece;
        if buf.len() < total {
            return Ok(Progress::NeedMore);
        }

        buf.advance(basic_len + header_len + ext_len);
        let data = buf.split_to(piece);

        let state = self.streams.entry(csid).or_default();
        if !continuing {
            state.timestamp = match fmt {
                0 => ts_field,
                _ => state.timestamp.wrapping_add(ts_field),
            };
            state.delta = if fmt == 0 { 0 } else { ts_field };
            state.length = length;
            state.msg_type = msg_type;
            state.stream_id = stream_id;
            state.payload.clear();
        }
        if fmt == 0 {
            // fmt 3 chunks after a fmt 0 header repeat the absolute timestamp as delta
            state.delta = 0;
        }
        state.extended = extended;
        state.payload.extend_from_slice(&data);

        if state.payload.len() < state.length as usize {
            return Ok(Progress::Partial);
        }

        let payload = state.payload.split().freeze();
        Ok(Progress::Complete(RtmpMessage::new(
            state.msg_type,
            state.timestamp,
            state.stream_id,
            payload,
        )))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u24(buf: &mut &[u8]) -> u32 {
    let b = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

/// Chunk stream encoder
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: usize,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as usize,
        }
    }

    /// Change the outgoing chunk size
    ///
    /// The peer must be told with a Set Chunk Size message encoded *before*
    /// this call.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE) as usize;
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encode a message on its default chunk stream
    pub fn encode(&self, msg: &RtmpMessage, out: &mut BytesMut) {
        self.encode_on(msg.chunk_stream_id(), msg, out);
    }

    /// Encode a message on an explicit chunk stream
    pub fn encode_on(&self, csid: u32, msg: &RtmpMessage, out: &mut BytesMut) {
        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            msg.timestamp
        };

        out.reserve(msg.payload.len() + 18);
        write_basic_header(out, 0, csid);
        put_u24(out, ts_field);
        put_u24(out, msg.payload.len() as u32);
        out.put_u8(msg.msg_type);
        out.put_u32_le(msg.stream_id);
        if extended {
            out.put_u32(msg.timestamp);
        }

        let mut chunks = msg.payload.chunks(self.chunk_size);
        if let Some(first) = chunks.next() {
            out.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(out, 3, csid);
            if extended {
                out.put_u32(msg.timestamp);
            }
            out.put_slice(chunk);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(out: &mut BytesMut, fmt: u8, csid: u32) {
    match csid {
        0..=63 => out.put_u8((fmt << 6) | csid as u8),
        64..=319 => {
            out.put_u8(fmt << 6);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            let rest = csid - 64;
            out.put_u8((fmt << 6) | 1);
            out.put_u8((rest & 0xFF) as u8);
            out.put_u8((rest >> 8) as u8);
        }
    }
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}
