//! AMF value types
//!
//! The subset of AMF0 values that RTMP command and data messages use.

use std::collections::HashMap;

/// AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// Null (0x05)
    #[default]
    Null,

    /// Undefined (0x06)
    Undefined,

    /// Boolean (0x01)
    Boolean(bool),

    /// IEEE 754 double (0x00)
    Number(f64),

    /// UTF-8 string (0x02, or 0x0C when longer than 65535 bytes)
    String(String),

    /// Anonymous object (0x03)
    Object(HashMap<String, AmfValue>),

    /// Associative array (0x08), used by `onMetaData`
    EcmaArray(HashMap<String, AmfValue>),

    /// Dense array (0x0A)
    Array(Vec<AmfValue>),

    /// Milliseconds since the Unix epoch (0x0B)
    Date(f64),
}

impl AmfValue {
    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Object or ECMA array properties
    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Build an object from key/value pairs
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(f64::from(v))
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        let s = AmfValue::from("test");
        assert_eq!(s.as_str(), Some("test"));
        assert_eq!(s.as_number(), None);

        let n = AmfValue::from(42u32);
        assert_eq!(n.as_number(), Some(42.0));
        assert!(AmfValue::Undefined.is_null_or_undefined());
    }

    #[test]
    fn test_object_builder() {
        let obj = AmfValue::object([("code", AmfValue::from("ok")), ("n", 1.0.into())]);
        assert_eq!(obj.get_string("code"), Some("ok"));
        assert_eq!(obj.get_number("n"), Some(1.0));
        assert!(obj.get("missing").is_none());
    }
}
