//! Serialization formats for non-integer values.
//!
//! A [`Format`] turns a [`Value`] into an opaque blob and back. Two formats
//! ship with the crate:
//!
//! | Format | Size | Human readable | Notes |
//! |--------|------|----------------|-------|
//! | [`BincodeFormat`] | Compact | No | Default |
//! | [`JsonFormat`] | Larger | Yes | Handy when inspecting keys with `redis-cli` |
//!
//! Whatever the format, an encoded blob must never be a bare base-10
//! integer: the read path tries an integer parse before decoding. Both
//! formats satisfy this because they encode the enum tag first (a control
//! byte for bincode, `"` or `{` for JSON).

use bytes::Bytes;
use thiserror::Error;

use crate::Value;

mod bincode;
mod json;

pub use self::bincode::BincodeFormat;
pub use self::json::JsonFormat;

/// Error raised while encoding or decoding a value.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The value could not be serialized.
    #[error(transparent)]
    Serialize(Box<dyn std::error::Error + Send>),

    /// The stored bytes could not be deserialized.
    #[error(transparent)]
    Deserialize(Box<dyn std::error::Error + Send>),
}

/// Unique identifier for format types, used to compare format equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTypeId {
    /// [`JsonFormat`].
    Json,
    /// [`BincodeFormat`].
    Bincode,
    /// For user-defined custom formats. The string should be a unique identifier.
    Custom(&'static str),
}

/// Object-safe value serialization format.
///
/// Usable as `&dyn Format` or `Arc<dyn Format>` so the format can be chosen
/// from configuration at runtime.
pub trait Format: std::fmt::Debug + Send + Sync {
    /// Serialize a value to bytes.
    fn encode(&self, value: &Value) -> Result<Bytes, FormatError>;

    /// Deserialize a value from bytes produced by [`Format::encode`].
    fn decode(&self, data: &[u8]) -> Result<Value, FormatError>;

    /// Returns a unique identifier for this format type.
    fn format_type_id(&self) -> FormatTypeId;
}
