//! AMF0 encoder and decoder
//!
//! Type markers handled:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x08 - ECMA Array (associative array)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported (decoded as undefined)
//! ```

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::AmfValue;
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;

/// Maximum nesting depth for objects/arrays
const MAX_NESTING_DEPTH: usize = 64;

/// AMF0 decoder
///
/// Lenient by default: a missing object end marker at the end of the buffer
/// is accepted, since several encoders omit it.
pub struct Amf0Decoder {
    lenient: bool,
    depth: usize,
}

impl Amf0Decoder {
    /// Create a lenient decoder
    pub fn new() -> Self {
        Self {
            lenient: true,
            depth: 0,
        }
    }

    /// Create decoder with explicit lenient mode setting
    pub fn with_lenient(lenient: bool) -> Self {
        Self { lenient, depth: 0 }
    }

    /// Decode a single AMF0 value from the buffer
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode all values from buffer until exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                need(buf, 8)?;
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                need(buf, 1)?;
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_OBJECT => Ok(AmfValue::Object(self.read_properties(buf)?)),
            MARKER_ECMA_ARRAY => {
                need(buf, 4)?;
                // Count is a hint only; the end marker terminates the array
                let _count = buf.get_u32();
                Ok(AmfValue::EcmaArray(self.read_properties(buf)?))
            }
            MARKER_STRICT_ARRAY => {
                need(buf, 4)?;
                let count = buf.get_u32() as usize;
                let mut elements = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    elements.push(self.decode(buf)?);
                }
                Ok(AmfValue::Array(elements))
            }
            MARKER_DATE => {
                need(buf, 10)?;
                let timestamp = buf.get_f64();
                let _timezone = buf.get_i16();
                Ok(AmfValue::Date(timestamp))
            }
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            _ if self.lenient => Ok(AmfValue::Undefined),
            _ => Err(AmfError::UnknownMarker(marker)),
        }
    }

    /// Read `key value` pairs up to the empty-key + 0x09 terminator
    fn read_properties(&mut self, buf: &mut Bytes) -> Result<HashMap<String, AmfValue>, AmfError> {
        let mut properties = HashMap::new();

        loop {
            if self.lenient && buf.is_empty() {
                break;
            }
            let key = read_utf8(buf)?;

            if key.is_empty() {
                if buf.is_empty() {
                    if self.lenient {
                        break;
                    }
                    return Err(AmfError::UnexpectedEof);
                }
                let end = buf.get_u8();
                if end == MARKER_OBJECT_END || self.lenient {
                    break;
                }
                return Err(AmfError::InvalidObjectEnd);
            }

            let value = self.decode(buf)?;
            properties.insert(key, value);
        }

        Ok(properties)
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        Err(AmfError::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_utf8_body(buf, len)
}

fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    need(buf, 4)?;
    let len = buf.get_u32() as usize;
    read_utf8_body(buf, len)
}

fn read_utf8_body(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    need(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Encode a single AMF0 value
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                if s.len() > 0xFFFF {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_properties(props);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
            AmfValue::Date(timestamp) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*timestamp);
                self.buf.put_i16(0);
            }
        }
    }

    /// Encode multiple values
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_properties(&mut self, props: &HashMap<String, AmfValue>) {
        for (key, val) in props {
            let len = key.len().min(0xFFFF);
            self.buf.put_u16(len as u16);
            self.buf.put_slice(&key.as_bytes()[..len]);
            self.encode(val);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode multiple values
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Convenience function to decode all values
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        let values = vec![
            AmfValue::from("connect"),
            AmfValue::Number(1.0),
            AmfValue::object([("app", "live")]),
            AmfValue::Null,
        ];

        let decoded = decode_all(&encode_all(&values)).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_ecma_array() {
        let mut props = HashMap::new();
        props.insert("width".to_string(), AmfValue::Number(1920.0));
        props.insert("streamName".to_string(), AmfValue::from("cam1"));
        let decoded = decode_all(&encode_all(&[AmfValue::EcmaArray(props)])).unwrap();

        assert_eq!(decoded[0].get_number("width"), Some(1920.0));
        assert_eq!(decoded[0].get_string("streamName"), Some("cam1"));
    }

    #[test]
    fn test_long_string() {
        let long = "x".repeat(70000);
        let encoded = encode_all(&[AmfValue::String(long.clone())]);
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        assert_eq!(decode_all(&encoded).unwrap(), vec![AmfValue::String(long)]);
    }

    #[test]
    fn test_missing_object_end_is_lenient() {
        // Object with one property and no terminator
        let mut raw = vec![MARKER_OBJECT, 0x00, 0x01, b'a', MARKER_NULL];
        assert_eq!(
            decode_all(&raw).unwrap()[0].get("a"),
            Some(&AmfValue::Null)
        );

        raw.extend_from_slice(&[0x00, 0x00]);
        let mut strict = Amf0Decoder::with_lenient(false);
        let result = strict.decode(&mut Bytes::from(raw));
        assert_eq!(result, Err(AmfError::UnexpectedEof));
    }

    #[test]
    fn test_truncated_number() {
        let raw = [MARKER_NUMBER, 0x40, 0x45];
        assert_eq!(decode_all(&raw), Err(AmfError::UnexpectedEof));
    }

    #[test]
    fn test_unknown_marker() {
        let mut strict = Amf0Decoder::with_lenient(false);
        let result = strict.decode(&mut Bytes::from_static(&[0x42]));
        assert_eq!(result, Err(AmfError::UnknownMarker(0x42)));

        assert_eq!(decode_all(&[0x42]).unwrap(), vec![AmfValue::Undefined]);
    }
}
