//! FLV tags and the FLV byte-stream framing used by live FLV ingest
//!
//! RTMP audio/video messages are FLV tag bodies. A raw FLV stream wraps them:
//!
//! ```text
//! Header:  'F' 'L' 'V' | version(1) | flags(1) | header size(4)
//! Body:    prev tag size(4) | tag | prev tag size(4) | tag | ...
//! Tag:     type(1) | data size(3) | timestamp(3) + ext(1) | stream id(3) | data
//! ```
//!
//! Video data starts with `frame type(4 bits) | codec id(4 bits)`, audio data
//! with `sound format(4 bits) | rate | size | channels`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the FLV file header
pub const FLV_HEADER_SIZE: usize = 9;

/// Size of a tag header
pub const TAG_HEADER_SIZE: usize = 11;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

const CODEC_AVC: u8 = 7;
const CODEC_HEVC: u8 = 12;
const SOUND_AAC: u8 = 10;

/// Tags larger than this are treated as a corrupt stream
const MAX_TAG_SIZE: usize = 16 * 1024 * 1024;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            TAG_AUDIO => Some(FlvTagType::Audio),
            TAG_VIDEO => Some(FlvTagType::Video),
            TAG_SCRIPT => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            FlvTagType::Audio => TAG_AUDIO,
            FlvTagType::Video => TAG_VIDEO,
            FlvTagType::Script => TAG_SCRIPT,
        }
    }
}

/// One FLV tag body with its type and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body including the codec header byte(s)
    pub data: Bytes,
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    pub fn script(data: Bytes) -> Self {
        Self::new(FlvTagType::Script, 0, data)
    }

    /// Video keyframe (frame type 1)
    pub fn is_keyframe(&self) -> bool {
        self.tag_type == FlvTagType::Video
            && self.data.first().map(|b| b >> 4 == 1).unwrap_or(false)
    }

    /// AVC or HEVC decoder configuration record
    pub fn is_video_sequence_header(&self) -> bool {
        if self.tag_type != FlvTagType::Video || self.data.len() < 2 {
            return false;
        }
        let codec = self.data[0] & 0x0F;
        (codec == CODEC_AVC || codec == CODEC_HEVC) && self.data[1] == 0
    }

    /// AAC AudioSpecificConfig
    pub fn is_audio_sequence_header(&self) -> bool {
        self.tag_type == FlvTagType::Audio
            && self.data.len() >= 2
            && self.data[0] >> 4 == SOUND_AAC
            && self.data[1] == 0
    }

    /// Serialize with tag header and trailing previous-tag-size
    pub fn write_to(&self, out: &mut BytesMut) {
        let len = self.data.len() as u32;
        out.reserve(TAG_HEADER_SIZE + self.data.len() + 4);
        out.put_u8(self.tag_type.as_byte());
        put_u24(out, len);
        put_u24(out, self.timestamp & 0x00FF_FFFF);
        out.put_u8((self.timestamp >> 24) as u8);
        put_u24(out, 0);
        out.put_slice(&self.data);
        out.put_u32(len + TAG_HEADER_SIZE as u32);
    }
}

/// Write an FLV header and the leading previous-tag-size of zero
pub fn write_header(out: &mut BytesMut, has_audio: bool, has_video: bool) {
    out.put_slice(b"FLV");
    out.put_u8(1);
    out.put_u8((u8::from(has_audio) << 2) | u8::from(has_video));
    out.put_u32(FLV_HEADER_SIZE as u32);
    out.put_u32(0);
}

/// Incremental parser for an FLV byte stream
#[derive(Debug, Default)]
pub struct FlvStreamReader {
    header_done: bool,
}

impl FlvStreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the next tag, consuming its bytes from `buf`
    ///
    /// Returns `Ok(None)` when `buf` does not hold a complete tag yet. Tags of
    /// unknown type are skipped.
    pub fn next_tag(&mut self, buf: &mut BytesMut) -> Result<Option<FlvTag>, ProtocolError> {
        if !self.header_done {
            if buf.len() < FLV_HEADER_SIZE + 4 {
                return Ok(None);
            }
            if &buf[..3] != b"FLV" {
                return Err(ProtocolError::UnexpectedMessage(
                    "missing FLV signature".to_string(),
                ));
            }
            let header_len = (&buf[5..9]).get_u32() as usize;
            if header_len < FLV_HEADER_SIZE {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "FLV header size {} too small",
                    header_len
                )));
            }
            if buf.len() < header_len + 4 {
                return Ok(None);
            }
            buf.advance(header_len + 4);
            self.header_done = true;
        }

        loop {
            if buf.len() < TAG_HEADER_SIZE {
                return Ok(None);
            }
            let mut header = &buf[..TAG_HEADER_SIZE];
            let type_byte = header.get_u8();
            let data_len = read_u24(&mut header) as usize;
            let ts_low = read_u24(&mut header);
            let ts_ext = header.get_u8();

            if data_len > MAX_TAG_SIZE {
                return Err(ProtocolError::MessageTooLarge(data_len as u32));
            }
            let total = TAG_HEADER_SIZE + data_len + 4;
            if buf.len() < total {
                return Ok(None);
            }

            buf.advance(TAG_HEADER_SIZE);
            let data = buf.split_to(data_len).freeze();
            buf.advance(4);

            match FlvTagType::from_byte(type_byte) {
                Some(tag_type) => {
                    let timestamp = (u32::from(ts_ext) << 24) | ts_low;
                    return Ok(Some(FlvTag::new(tag_type, timestamp, data)));
                }
                None => {
                    tracing::debug!(tag_type = type_byte, size = data_len, "Skipping unknown FLV tag");
                }
            }
        }
    }
}

fn read_u24(buf: &mut &[u8]) -> u32 {
    let b = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

fn put_u24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_classification() {
        let avc_header = FlvTag::video(0, Bytes::from_static(&[0x17, 0x00]));
        assert!(avc_header.is_keyframe());
        assert!(avc_header.is_video_sequence_header());

        let inter = FlvTag::video(40, Bytes::from_static(&[0x27, 0x01]));
        assert!(!inter.is_keyframe());
        assert!(!inter.is_video_sequence_header());

        let aac_header = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00]));
        assert!(aac_header.is_audio_sequence_header());
        assert!(!FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01])).is_audio_sequence_header());
        // MP3 has no sequence header
        assert!(!FlvTag::audio(0, Bytes::from_static(&[0x2F, 0x00])).is_audio_sequence_header());
    }

    #[test]
    fn test_empty_data() {
        let tag = FlvTag::video(0, Bytes::new());
        assert!(!tag.is_keyframe());
        assert!(!tag.is_video_sequence_header());
    }

    #[test]
    fn test_stream_reader() {
        let mut wire = BytesMut::new();
        write_header(&mut wire, true, true);
        FlvTag::script(Bytes::from_static(b"meta")).write_to(&mut wire);
        FlvTag::video(0x0100_0010, Bytes::from_static(&[0x17, 0x01, 0xAA])).write_to(&mut wire);

        let mut reader = FlvStreamReader::new();
        let script = reader.next_tag(&mut wire).unwrap().unwrap();
        assert_eq!(script.tag_type, FlvTagType::Script);
        assert_eq!(&script.data[..], b"meta");

        let video = reader.next_tag(&mut wire).unwrap().unwrap();
        assert_eq!(video.timestamp, 0x0100_0010);
        assert!(video.is_keyframe());
        assert!(wire.is_empty());
        assert_eq!(reader.next_tag(&mut wire).unwrap(), None);
    }

    #[test]
    fn test_stream_reader_partial_tag() {
        let mut tags = BytesMut::new();
        FlvTag::audio(5, Bytes::from_static(&[0xAF, 0x01, 0x02])).write_to(&mut tags);

        let mut wire = BytesMut::new();
        write_header(&mut wire, true, false);
        wire.extend_from_slice(&tags[..8]);

        let mut reader = FlvStreamReader::new();
        assert_eq!(reader.next_tag(&mut wire).unwrap(), None);
        wire.extend_from_slice(&tags[8..]);
        let audio = reader.next_tag(&mut wire).unwrap().unwrap();
        assert_eq!(audio.timestamp, 5);
    }

    #[test]
    fn test_bad_signature() {
        let mut wire = BytesMut::from(&b"XYZ\x01\x05\x00\x00\x00\x09\x00\x00\x00\x00"[..]);
        let mut reader = FlvStreamReader::new();
        assert!(reader.next_tag(&mut wire).is_err());
    }
}
