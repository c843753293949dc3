//! Frames fanned out from an inbound stream to its outbound subscribers

use bytes::{BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::media::flv::{FlvTag, FlvTagType};
use crate::protocol::constants::{CMD_SET_DATA_FRAME, MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO};
use crate::protocol::message::RtmpMessage;

/// Type of broadcast frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Video,
    Audio,
    /// AMF0 `onMetaData` values, without the `@setDataFrame` prefix
    Metadata,
}

/// A frame to be broadcast to subscribers
///
/// Cheap to clone: `data` is reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastFrame {
    pub frame_type: FrameType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    pub data: Bytes,
    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
    /// Whether this is a codec sequence header
    pub is_header: bool,
}

impl BroadcastFrame {
    pub fn video(timestamp: u32, data: Bytes, is_keyframe: bool, is_header: bool) -> Self {
        Self {
            frame_type: FrameType::Video,
            timestamp,
            data,
            is_keyframe,
            is_header,
        }
    }

    pub fn audio(timestamp: u32, data: Bytes, is_header: bool) -> Self {
        Self {
            frame_type: FrameType::Audio,
            timestamp,
            data,
            is_keyframe: false,
            is_header,
        }
    }

    pub fn metadata(data: Bytes) -> Self {
        Self {
            frame_type: FrameType::Metadata,
            timestamp: 0,
            data,
            is_keyframe: false,
            is_header: false,
        }
    }

    /// Convert an FLV tag, classifying keyframes and sequence headers
    pub fn from_flv_tag(tag: &FlvTag) -> Self {
        match tag.tag_type {
            FlvTagType::Video => Self::video(
                tag.timestamp,
                tag.data.clone(),
                tag.is_keyframe(),
                tag.is_video_sequence_header(),
            ),
            FlvTagType::Audio => {
                Self::audio(tag.timestamp, tag.data.clone(), tag.is_audio_sequence_header())
            }
            FlvTagType::Script => Self::metadata(tag.data.clone()),
        }
    }

    /// Convert an inbound RTMP audio, video or AMF0 data message
    ///
    /// `@setDataFrame` is stripped from data messages so metadata frames look
    /// the same regardless of the ingest protocol.
    pub fn from_message(msg: &RtmpMessage) -> Option<Self> {
        match msg.msg_type {
            MSG_VIDEO => Some(Self::from_flv_tag(&FlvTag::video(
                msg.timestamp,
                msg.payload.clone(),
            ))),
            MSG_AUDIO => Some(Self::from_flv_tag(&FlvTag::audio(
                msg.timestamp,
                msg.payload.clone(),
            ))),
            MSG_DATA_AMF0 => Some(Self::metadata(strip_set_data_frame(&msg.payload))),
            _ => None,
        }
    }

    /// RTMP message carrying this frame on `stream_id`
    pub fn to_message(&self, stream_id: u32) -> RtmpMessage {
        match self.frame_type {
            FrameType::Video => {
                RtmpMessage::new(MSG_VIDEO, self.timestamp, stream_id, self.data.clone())
            }
            FrameType::Audio => {
                RtmpMessage::new(MSG_AUDIO, self.timestamp, stream_id, self.data.clone())
            }
            FrameType::Metadata => {
                let prefix = amf0::encode_all(&[AmfValue::from(CMD_SET_DATA_FRAME)]);
                let mut payload = BytesMut::with_capacity(prefix.len() + self.data.len());
                payload.put_slice(&prefix);
                payload.put_slice(&self.data);
                RtmpMessage::new(MSG_DATA_AMF0, self.timestamp, stream_id, payload.freeze())
            }
        }
    }

    /// Decoded metadata values, for metadata frames
    pub fn metadata_values(&self) -> Option<Vec<AmfValue>> {
        if self.frame_type != FrameType::Metadata {
            return None;
        }
        amf0::decode_all(&self.data).ok()
    }
}

fn strip_set_data_frame(payload: &Bytes) -> Bytes {
    // 0x02, u16 length, then the string
    let marker_len = 3 + CMD_SET_DATA_FRAME.len();
    if payload.len() >= marker_len
        && payload[0] == 0x02
        && &payload[3..marker_len] == CMD_SET_DATA_FRAME.as_bytes()
    {
        payload.slice(marker_len..)
    } else {
        payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::CMD_ON_METADATA;

    #[test]
    fn test_video_message_classification() {
        let msg = RtmpMessage::new(MSG_VIDEO, 40, 1, Bytes::from_static(&[0x17, 0x00, 0x00]));
        let frame = BroadcastFrame::from_message(&msg).unwrap();
        assert_eq!(frame.frame_type, FrameType::Video);
        assert!(frame.is_keyframe);
        assert!(frame.is_header);
        assert_eq!(frame.to_message(7), RtmpMessage::new(MSG_VIDEO, 40, 7, msg.payload));
    }

    #[test]
    fn test_metadata_strips_and_restores_prefix() {
        let values = [
            AmfValue::from(CMD_SET_DATA_FRAME),
            AmfValue::from(CMD_ON_METADATA),
            AmfValue::object([("width", 1280.0)]),
        ];
        let msg = RtmpMessage::data(1, 0, &values);
        let frame = BroadcastFrame::from_message(&msg).unwrap();

        let decoded = frame.metadata_values().unwrap();
        assert_eq!(decoded[0].as_str(), Some(CMD_ON_METADATA));

        let out = frame.to_message(3);
        assert_eq!(amf0::decode_all(&out.payload).unwrap(), values.to_vec());
    }

    #[test]
    fn test_control_messages_are_not_frames() {
        assert!(BroadcastFrame::from_message(&RtmpMessage::set_chunk_size(4096)).is_none());
    }
}
