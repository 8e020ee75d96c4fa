//! Error types for cache operations.
//!
//! Absence of a key is never an error for reads: `get`, `get_many`,
//! `has_key` and `ttl` report it through their return values. Errors are
//! reserved for:
//!
//! - configuration problems, detected when the cache is constructed
//!   ([`Error::Config`])
//! - mutating a key that does not exist ([`Error::KeyNotFound`])
//! - running out of pooled connections ([`Error::PoolExhausted`])
//! - transport and server failures, passed through unchanged
//!   ([`Error::Redis`], [`Error::Pool`])

use r2d2::Error as PoolError;
use redis::RedisError;
use redstash_core::{CacheKey, FormatError};

use crate::settings::ConfigError;

/// Error type for cache operations.
///
/// # Examples
///
/// ```no_run
/// use redstash_redis::{Error, PoolRegistry, RedisCache};
///
/// # fn main() -> Result<(), Error> {
/// let registry = PoolRegistry::new();
/// let cache = RedisCache::builder().server("127.0.0.1:6379").build(&registry)?;
///
/// match cache.incr("visits", 1) {
///     Ok(visits) => println!("{visits} visits"),
///     Err(err) if err.is_not_found() => println!("counter was never initialized"),
///     Err(err) => return Err(err),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `incr`, `decr` or a version change targeted a key with no value.
    #[error("Key '{0}' not found")]
    KeyNotFound(CacheKey),

    /// The value at a key cannot take part in integer arithmetic.
    #[error("Value stored at '{key}' is a {found}, not an integer")]
    NotAnInteger {
        /// The key holding the value.
        key: CacheKey,
        /// Kind of the stored value.
        found: &'static str,
    },

    /// Integer arithmetic left the `i64` range.
    #[error("Integer overflow while updating '{0}'")]
    Overflow(CacheKey),

    /// Every pooled connection stayed checked out past the pool's
    /// connection timeout.
    #[error("Connection pool exhausted: all {max_connections} connections are in use")]
    PoolExhausted {
        /// Size of the pool.
        max_connections: u32,
    },

    /// No connection could be obtained for a reason other than exhaustion,
    /// typically an unreachable server.
    #[error("Failed to get a connection from the pool: {0}")]
    Pool(#[from] PoolError),

    /// An error from the underlying Redis client.
    ///
    /// This includes connection failures, protocol errors, authentication
    /// failures, and command execution errors.
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// A stored value could not be encoded or decoded.
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl Error {
    /// Returns `true` when the operation targeted a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }

    /// Returns `true` when the pool had no free connection.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::PoolExhausted { .. })
    }

    /// Returns `true` for configuration problems.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
