//! Cache key types and construction.
//!
//! This module provides the two types involved in turning a user key into the
//! exact string stored in Redis:
//!
//! - [`KeyFunction`] - holds the key prefix and default version and builds keys
//! - [`CacheKey`] - a fully built, versioned key
//!
//! ## Format
//!
//! Keys follow the Django cache layout `{prefix}:{version}:{key}`. With the
//! default empty prefix the result starts with a colon:
//!
//! ```
//! use redstash_core::KeyFunction;
//!
//! let keys = KeyFunction::default();
//! assert_eq!(keys.make_key("key1", None), ":1:key1");
//! assert_eq!(keys.make_key("key1", Some(7)), ":7:key1");
//!
//! let keys = KeyFunction::new("app", 2);
//! assert_eq!(keys.make_key("user:42", None), "app:2:user:42");
//! ```
//!
//! For a fixed prefix the layout is injective: the version never contains a
//! colon, so the first colon after the prefix always terminates it.

use std::borrow::Borrow;
use std::fmt;

use smol_str::{SmolStr, format_smolstr};
use tracing::warn;

/// Longest key memcached accepts. Keys above this are only warned about.
pub const MEMCACHE_MAX_KEY_LENGTH: usize = 250;

/// A fully-qualified cache key, already carrying its prefix and version.
///
/// Equality and hashing only look at the underlying string, so a `CacheKey`
/// compares equal to a plain `&str` with the same content and can be used to
/// look up `str`-keyed maps.
///
/// The only way to obtain a `CacheKey` is [`KeyFunction::make_key`] (or
/// [`CacheKey::from_raw`] for keys read back from storage), so a built key can
/// never be versioned twice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(SmolStr);

impl CacheKey {
    /// Wraps a string that is already a complete storage key.
    pub fn from_raw(raw: impl Into<SmolStr>) -> Self {
        CacheKey(raw.into())
    }

    /// Returns the key as stored in Redis.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<[u8]> for CacheKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for CacheKey {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for CacheKey {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<String> for CacheKey {
    fn eq(&self, other: &String) -> bool {
        self.0 == other.as_str()
    }
}

impl PartialEq<CacheKey> for str {
    fn eq(&self, other: &CacheKey) -> bool {
        other == self
    }
}

impl PartialEq<CacheKey> for &str {
    fn eq(&self, other: &CacheKey) -> bool {
        other == self
    }
}

/// Builds versioned [`CacheKey`]s from user keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFunction {
    prefix: SmolStr,
    version: i64,
}

impl Default for KeyFunction {
    fn default() -> Self {
        Self {
            prefix: SmolStr::default(),
            version: 1,
        }
    }
}

impl KeyFunction {
    /// Creates a key function with the given prefix and default version.
    pub fn new(prefix: impl Into<SmolStr>, version: i64) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the version used when an operation does not pass one.
    pub fn default_version(&self) -> i64 {
        self.version
    }

    /// Resolves an optional per-call version against the default.
    pub fn resolve_version(&self, version: Option<i64>) -> i64 {
        version.unwrap_or(self.version)
    }

    /// Builds the storage key for `key` at `version` (or the default version).
    ///
    /// Pure function of its inputs and the configured prefix/version. Keys
    /// that would be rejected by memcached produce a warning but are still
    /// built.
    pub fn make_key(&self, key: &str, version: Option<i64>) -> CacheKey {
        let version = self.resolve_version(version);
        let cache_key = CacheKey(format_smolstr!("{}:{}:{}", self.prefix, version, key));
        validate_key(&cache_key);
        cache_key
    }
}

/// Checks a built key for memcached compatibility.
///
/// Redis accepts any binary key, so problems are reported through
/// `tracing::warn!` only. Returns `false` if a warning was emitted.
pub fn validate_key(key: &CacheKey) -> bool {
    let raw = key.as_str();
    if raw.len() > MEMCACHE_MAX_KEY_LENGTH {
        warn!(
            key = raw,
            length = raw.len(),
            max = MEMCACHE_MAX_KEY_LENGTH,
            "Cache key will cause errors if used with memcached"
        );
        return false;
    }
    if raw.chars().any(|c| c.is_control() || c == ' ') {
        warn!(
            key = raw,
            "Cache key contains characters that will cause errors if used with memcached"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cache_key_usable_as_str_key() {
        let mut set = HashSet::new();
        set.insert(CacheKey::from_raw(":1:a"));
        assert!(set.contains(":1:a"));
        assert!(!set.contains(":2:a"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key(&CacheKey::from_raw(":1:fine")));
        assert!(!validate_key(&CacheKey::from_raw(":1:has space")));
        assert!(!validate_key(&CacheKey::from_raw(":1:tab\there")));
        assert!(!validate_key(&CacheKey::from_raw("x".repeat(251))));
        assert!(validate_key(&CacheKey::from_raw("x".repeat(250))));
    }
}
