//! Storage representation of cache values.
//!
//! Integers are written as their decimal text so that Redis `INCRBY` can
//! operate on them server side. Everything else is serialized with the
//! configured [`Format`].
//!
//! Reads try the integer interpretation first and fall back to the format:
//!
//! ```
//! use redstash_core::{Encoded, Value, ValueCodec};
//!
//! let codec = ValueCodec::default();
//!
//! let encoded = codec.encode(&Value::Int(41)).unwrap();
//! assert_eq!(encoded, Encoded::Integer(41));
//! assert_eq!(encoded.to_bytes().as_ref(), b"41");
//!
//! // Booleans are never integers.
//! assert!(matches!(codec.encode(&Value::Bool(true)).unwrap(), Encoded::Blob(_)));
//!
//! assert_eq!(codec.decode(b"-7").unwrap(), Value::Int(-7));
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::Value;
use crate::format::{BincodeFormat, Format, FormatError};

/// A value in the form it is written to Redis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoded {
    /// Native integer, incrementable by the server.
    Integer(i64),
    /// Serialized payload.
    Blob(Bytes),
}

impl Encoded {
    /// Returns the bytes sent to the server.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Encoded::Integer(n) => Bytes::from(n.to_string()),
            Encoded::Blob(blob) => blob.clone(),
        }
    }

    /// Returns `true` for the native integer representation.
    pub fn is_integer(&self) -> bool {
        matches!(self, Encoded::Integer(_))
    }
}

/// Encodes and decodes [`Value`]s using a [`Format`] for non-integers.
#[derive(Clone, Debug)]
pub struct ValueCodec {
    format: Arc<dyn Format>,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new(Arc::new(BincodeFormat))
    }
}

impl ValueCodec {
    /// Creates a codec serializing non-integers with `format`.
    pub fn new(format: Arc<dyn Format>) -> Self {
        Self { format }
    }

    /// Returns the blob format.
    pub fn format(&self) -> &dyn Format {
        self.format.as_ref()
    }

    /// Chooses the storage representation for `value`.
    pub fn encode(&self, value: &Value) -> Result<Encoded, FormatError> {
        match value {
            Value::Int(n) => Ok(Encoded::Integer(*n)),
            other => self.encode_blob(other).map(Encoded::Blob),
        }
    }

    /// Serializes `value` with the format, bypassing the integer path.
    pub fn encode_blob(&self, value: &Value) -> Result<Bytes, FormatError> {
        self.format.encode(value)
    }

    /// Restores a value from the bytes stored in Redis.
    pub fn decode(&self, data: &[u8]) -> Result<Value, FormatError> {
        match parse_integer(data) {
            Some(n) => Ok(Value::Int(n)),
            None => self.format.decode(data),
        }
    }
}

/// Parses `data` as a base-10 `i64`, the way Redis stores counters.
pub fn parse_integer(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonFormat;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(b"0"), Some(0));
        assert_eq!(parse_integer(b"-12"), Some(-12));
        assert_eq!(parse_integer(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_integer(b"9223372036854775808"), None);
        assert_eq!(parse_integer(b"1.5"), None);
        assert_eq!(parse_integer(b""), None);
        assert_eq!(parse_integer(&[0xff, 0x31]), None);
    }

    #[test]
    fn test_json_codec_keeps_text_digits_as_text() {
        let codec = ValueCodec::new(Arc::new(JsonFormat));
        let encoded = codec.encode(&Value::Str("42".to_owned())).unwrap();
        let Encoded::Blob(blob) = encoded else {
            panic!("text must be serialized");
        };
        assert_eq!(codec.decode(&blob).unwrap(), Value::Str("42".to_owned()));
    }
}
