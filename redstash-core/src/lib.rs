#![warn(missing_docs)]
//! # redstash-core
//!
//! I/O-free building blocks of the redstash cache:
//!
//! - [`KeyFunction`] / [`CacheKey`] - versioned key construction
//! - [`Value`] - the set of cacheable values
//! - [`ValueCodec`] / [`Encoded`] - native integers vs. serialized blobs
//! - [`format`] - pluggable blob formats ([`BincodeFormat`], [`JsonFormat`])
//! - [`Timeout`] / [`Expiry`] - write expiry semantics
//!
//! Talking to Redis lives in `redstash-redis`.

pub mod codec;
pub mod format;
pub mod key;
pub mod timeout;
pub mod value;

pub use codec::{Encoded, ValueCodec, parse_integer};
pub use format::{BincodeFormat, Format, FormatError, FormatTypeId, JsonFormat};
pub use key::{CacheKey, KeyFunction, validate_key};
pub use timeout::{Expiry, Timeout};
pub use value::{Value, ValueTypeError};

#[doc(hidden)]
pub use smol_str::SmolStr;
