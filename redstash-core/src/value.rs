//! Values that can be stored in the cache.
//!
//! [`Value`] is the closed set of shapes the cache knows how to persist:
//! primitives, text, raw bytes and nested lists/maps of those. Integers are
//! special: they are stored natively so Redis can increment them, every other
//! variant goes through a [`Format`](crate::format::Format).
//!
//! ```
//! use redstash_core::Value;
//!
//! let value = Value::from(vec![Value::from(1), Value::from("two")]);
//! assert!(matches!(value, Value::List(ref items) if items.len() == 2));
//!
//! let flag: bool = Value::Bool(true).try_into().unwrap();
//! assert!(flag);
//! ```

use std::fmt;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cacheable value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value that is still worth caching.
    Nil,
    /// Boolean. Never stored as an integer.
    Bool(bool),
    /// Signed integer, stored natively.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Opaque binary payload, round-tripped byte for byte.
    Bytes(Bytes),
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed map preserving insertion order.
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Returns the variant name, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns the integer if this is [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text if this is [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => write!(f, "[{} items]", items.len()),
            Value::Map(map) => write!(f, "{{{} entries}}", map.len()),
        }
    }
}

/// Returned when a [`Value`] does not hold the requested type.
#[derive(Debug, Error, PartialEq)]
#[error("expected {expected}, found {found}")]
pub struct ValueTypeError {
    /// The requested type.
    pub expected: &'static str,
    /// The variant actually held.
    pub found: &'static str,
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(value: IndexMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

impl TryFrom<Value> for i64 {
    type Error = ValueTypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(n) => Ok(n),
            other => Err(ValueTypeError {
                expected: "int",
                found: other.kind(),
            }),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = ValueTypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ValueTypeError {
                expected: "bool",
                found: other.kind(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = ValueTypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Float(x) => Ok(x),
            other => Err(ValueTypeError {
                expected: "float",
                found: other.kind(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = ValueTypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(ValueTypeError {
                expected: "str",
                found: other.kind(),
            }),
        }
    }
}

impl TryFrom<Value> for Bytes {
    type Error = ValueTypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueTypeError {
                expected: "bytes",
                found: other.kind(),
            }),
        }
    }
}
