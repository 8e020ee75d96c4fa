#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod settings;

#[doc(inline)]
pub use crate::cache::{RedisCache, RedisCacheBuilder};
pub use crate::error::{Error, Result};
#[doc(inline)]
pub use crate::pool::{
    ConnectionIdentity, ConnectionParams, ConnectionPool, PoolFactory, PoolRegistry,
    PooledConnection, RedisConnectionManager,
};
pub use crate::settings::{
    CacheOptions, CacheSettings, ConfigError, ParserClass, PoolOptions, SerializerClass,
    ServerAddress,
};

pub use redstash_core::{CacheKey, Expiry, Format, KeyFunction, Timeout, Value, ValueCodec};
