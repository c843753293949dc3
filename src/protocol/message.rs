//! RTMP messages and commands
//!
//! [`RtmpMessage`] is a reassembled message as it comes out of the chunk
//! decoder. [`Command`] is the AMF0 view of command messages (type 20):
//!
//! ```text
//! name (string) | transaction id (number) | command object | args...
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, AmfValue};
use crate::error::ProtocolError;
use crate::protocol::constants::*;

/// A complete RTMP message
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    /// Message type ID
    pub msg_type: u8,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Message stream ID (0 = NetConnection)
    pub stream_id: u32,
    /// Message body
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(msg_type: u8, timestamp: u32, stream_id: u32, payload: Bytes) -> Self {
        Self {
            msg_type,
            timestamp,
            stream_id,
            payload,
        }
    }

    /// Set Chunk Size (type 1)
    pub fn set_chunk_size(size: u32) -> Self {
        Self::control(MSG_SET_CHUNK_SIZE, size & 0x7FFF_FFFF)
    }

    /// Acknowledgement (type 3)
    pub fn acknowledgement(sequence: u32) -> Self {
        Self::control(MSG_ACKNOWLEDGEMENT, sequence)
    }

    /// Window Acknowledgement Size (type 5)
    pub fn window_ack_size(size: u32) -> Self {
        Self::control(MSG_WINDOW_ACK_SIZE, size)
    }

    /// Set Peer Bandwidth (type 6) with the dynamic limit type
    pub fn set_peer_bandwidth(size: u32) -> Self {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u32(size);
        buf.put_u8(2);
        Self::new(MSG_SET_PEER_BANDWIDTH, 0, 0, buf.freeze())
    }

    /// User Control event with a 4-byte argument
    pub fn user_control(event: u16, value: u32) -> Self {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u16(event);
        buf.put_u32(value);
        Self::new(MSG_USER_CONTROL, 0, 0, buf.freeze())
    }

    /// AMF0 command on the given message stream
    pub fn command(stream_id: u32, command: &Command) -> Self {
        Self::new(MSG_COMMAND_AMF0, 0, stream_id, command.encode())
    }

    /// AMF0 data message on the given message stream
    pub fn data(stream_id: u32, timestamp: u32, values: &[AmfValue]) -> Self {
        Self::new(MSG_DATA_AMF0, timestamp, stream_id, amf0::encode_all(values))
    }

    fn control(msg_type: u8, value: u32) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(value);
        Self::new(msg_type, 0, 0, buf.freeze())
    }

    /// First 4 bytes as a big-endian u32 (protocol control payloads)
    pub fn control_value(&self) -> Option<u32> {
        if self.payload.len() >= 4 {
            Some((&self.payload[..4]).get_u32())
        } else {
            None
        }
    }

    /// Chunk stream this message should travel on
    pub fn chunk_stream_id(&self) -> u32 {
        match self.msg_type {
            MSG_SET_CHUNK_SIZE | MSG_ABORT | MSG_ACKNOWLEDGEMENT | MSG_USER_CONTROL
            | MSG_WINDOW_ACK_SIZE | MSG_SET_PEER_BANDWIDTH => CSID_PROTOCOL_CONTROL,
            MSG_AUDIO => CSID_AUDIO,
            MSG_VIDEO => CSID_VIDEO,
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => CSID_DATA,
            _ => CSID_COMMAND,
        }
    }
}

/// Decoded AMF0 command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64, command_object: AmfValue) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object,
            arguments: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, value: impl Into<AmfValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    /// Decode from a command message payload
    ///
    /// AMF3 command messages carry one leading format byte before AMF0 data.
    pub fn decode(msg: &RtmpMessage) -> Result<Self, ProtocolError> {
        let mut payload = msg.payload.clone();
        if msg.msg_type == MSG_COMMAND_AMF3 && payload.has_remaining() {
            payload.advance(1);
        }

        let values = amf0::decode_all(&payload)
            .map_err(|e| ProtocolError::InvalidCommand(e.to_string()))?;
        let mut values = values.into_iter();

        let name = match values.next() {
            Some(AmfValue::String(name)) => name,
            other => {
                return Err(ProtocolError::InvalidCommand(format!(
                    "expected command name, got {:?}",
                    other
                )))
            }
        };
        let transaction_id = values.next().and_then(|v| v.as_number()).unwrap_or(0.0);
        let command_object = values.next().unwrap_or(AmfValue::Null);

        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments: values.collect(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut values = Vec::with_capacity(3 + self.arguments.len());
        values.push(AmfValue::String(self.name.clone()));
        values.push(AmfValue::Number(self.transaction_id));
        values.push(self.command_object.clone());
        values.extend(self.arguments.iter().cloned());
        amf0::encode_all(&values)
    }

    /// `connect` carrying the client identification
    pub fn connect(transaction_id: f64, params: &ConnectParams) -> Self {
        Self::new(CMD_CONNECT, transaction_id, params.to_amf())
    }

    pub fn release_stream(transaction_id: f64, stream_name: &str) -> Self {
        Self::new(CMD_RELEASE_STREAM, transaction_id, AmfValue::Null).arg(stream_name)
    }

    pub fn fc_publish(transaction_id: f64, stream_name: &str) -> Self {
        Self::new(CMD_FC_PUBLISH, transaction_id, AmfValue::Null).arg(stream_name)
    }

    pub fn create_stream(transaction_id: f64) -> Self {
        Self::new(CMD_CREATE_STREAM, transaction_id, AmfValue::Null)
    }

    pub fn publish(stream_name: &str, publish_type: &str) -> Self {
        Self::new(CMD_PUBLISH, 0.0, AmfValue::Null)
            .arg(stream_name)
            .arg(publish_type)
    }

    pub fn delete_stream(stream_id: u32) -> Self {
        Self::new(CMD_DELETE_STREAM, 0.0, AmfValue::Null).arg(stream_id)
    }

    /// `_result` answer to a transaction
    pub fn result(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Self::new(CMD_RESULT, transaction_id, properties).arg(info)
    }

    /// `_error` answer to a transaction
    pub fn error(transaction_id: f64, info: AmfValue) -> Self {
        Self::new(CMD_ERROR, transaction_id, AmfValue::Null).arg(info)
    }

    /// `onStatus` notification
    pub fn on_status(level: &str, code: &str, description: &str) -> Self {
        Self::new(CMD_ON_STATUS, 0.0, AmfValue::Null).arg(status_info(level, code, description))
    }

    /// `code` property of the info object (`_result`, `_error`, `onStatus`)
    pub fn status_code(&self) -> Option<&str> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find_map(|v| v.get_string("code"))
    }

    /// `level` property of the info object
    pub fn status_level(&self) -> Option<&str> {
        self.arguments
            .iter()
            .chain(std::iter::once(&self.command_object))
            .find_map(|v| v.get_string("level"))
    }

    /// First numeric argument (stream id in a `createStream` result)
    pub fn first_number_arg(&self) -> Option<f64> {
        self.arguments.iter().find_map(|v| v.as_number())
    }

    /// First string argument (stream name in `publish`, `releaseStream`, ...)
    pub fn first_string_arg(&self) -> Option<&str> {
        self.arguments.iter().find_map(|v| v.as_str())
    }
}

/// Standard `{level, code, description}` info object
pub fn status_info(level: &str, code: &str, description: &str) -> AmfValue {
    AmfValue::object([
        ("level", level),
        ("code", code),
        ("description", description),
    ])
}

/// Parameters of a `connect` command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    /// Application name
    pub app: String,
    /// Client identification string
    pub flash_ver: Option<String>,
    /// URL of the target application
    pub tc_url: Option<String>,
    /// URL of the page the client ran in
    pub page_url: Option<String>,
    /// AMF encoding the client wants (0 = AMF0)
    pub object_encoding: f64,
}

impl ConnectParams {
    pub fn from_amf(obj: &AmfValue) -> Self {
        Self {
            app: obj.get_string("app").unwrap_or_default().to_string(),
            flash_ver: obj.get_string("flashVer").map(str::to_string),
            tc_url: obj.get_string("tcUrl").map(str::to_string),
            page_url: obj.get_string("pageUrl").map(str::to_string),
            object_encoding: obj.get_number("objectEncoding").unwrap_or(0.0),
        }
    }

    pub fn to_amf(&self) -> AmfValue {
        let mut props = vec![
            ("app", AmfValue::from(self.app.as_str())),
            ("type", "nonprivate".into()),
            ("fpad", false.into()),
            ("capabilities", 15.0.into()),
            ("audioCodecs", 3191.0.into()),
            ("videoCodecs", 252.0.into()),
            ("videoFunction", 1.0.into()),
            ("objectEncoding", self.object_encoding.into()),
        ];
        if let Some(ref v) = self.flash_ver {
            props.push(("flashVer", v.as_str().into()));
        }
        if let Some(ref v) = self.tc_url {
            props.push(("tcUrl", v.as_str().into()));
        }
        if let Some(ref v) = self.page_url {
            props.push(("pageUrl", v.as_str().into()));
        }
        AmfValue::object(props)
    }
}

/// Parameters of a `publish` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishParams {
    /// Stream name, possibly carrying a `?query` suffix
    pub stream_key: String,
    /// "live", "record" or "append"
    pub publish_type: String,
    /// Message stream the publish arrived on
    pub stream_id: u32,
}

impl PublishParams {
    pub fn from_command(command: &Command, stream_id: u32) -> Option<Self> {
        let stream_key = command.arguments.first()?.as_str()?.to_string();
        let publish_type = command
            .arguments
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or("live")
            .to_string();
        Some(Self {
            stream_key,
            publish_type,
            stream_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let params = ConnectParams {
            app: "live".into(),
            flash_ver: Some("FMLE/3.0".into()),
            tc_url: Some("rtmp://localhost:1935/live".into()),
            ..Default::default()
        };
        let msg = RtmpMessage::command(0, &Command::connect(1.0, &params));
        assert_eq!(msg.msg_type, MSG_COMMAND_AMF0);

        let decoded = Command::decode(&msg).unwrap();
        assert_eq!(decoded.name, CMD_CONNECT);
        assert_eq!(decoded.transaction_id, 1.0);
        assert_eq!(ConnectParams::from_amf(&decoded.command_object), params);
    }

    #[test]
    fn test_status_code_lookup() {
        let status = Command::on_status("status", NS_PUBLISH_START, "Publishing");
        let decoded = Command::decode(&RtmpMessage::command(1, &status)).unwrap();

        assert_eq!(decoded.status_code(), Some(NS_PUBLISH_START));
        assert_eq!(decoded.status_level(), Some("status"));
    }

    #[test]
    fn test_create_stream_result() {
        let result = Command::result(4.0, AmfValue::Null, AmfValue::Number(1.0));
        let decoded = Command::decode(&RtmpMessage::command(0, &result)).unwrap();

        assert_eq!(decoded.name, CMD_RESULT);
        assert_eq!(decoded.transaction_id, 4.0);
        assert_eq!(decoded.first_number_arg(), Some(1.0));
    }

    #[test]
    fn test_publish_params() {
        let publish = Command::publish("cam1?token=x", "live");
        let params = PublishParams::from_command(&publish, 1).unwrap();
        assert_eq!(params.stream_key, "cam1?token=x");
        assert_eq!(params.publish_type, "live");
    }

    #[test]
    fn test_decode_rejects_missing_name() {
        let msg = RtmpMessage::new(MSG_COMMAND_AMF0, 0, 0, amf0::encode_all(&[1.0.into()]));
        assert!(matches!(
            Command::decode(&msg),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(RtmpMessage::set_chunk_size(4096).control_value(), Some(4096));
        assert_eq!(
            RtmpMessage::set_chunk_size(4096).chunk_stream_id(),
            CSID_PROTOCOL_CONTROL
        );
        assert_eq!(RtmpMessage::set_peer_bandwidth(100).payload.len(), 5);
    }
}
