//! Redis cache client.
//!
//! [`RedisCache`] is a blocking, fail-fast wrapper around a shared
//! [`ConnectionPool`]: every call checks out a connection, issues one
//! command (or one pipelined batch) and returns. Transport errors are passed
//! through untouched and nothing is retried.
//!
//! ```no_run
//! use redstash_redis::{PoolRegistry, RedisCache, Timeout};
//!
//! # fn main() -> Result<(), redstash_redis::Error> {
//! let registry = PoolRegistry::new();
//! let cache = RedisCache::builder()
//!     .server("127.0.0.1:6379")
//!     .db(2)
//!     .build(&registry)?;
//!
//! cache.set("answer", 41, Timeout::Default)?;
//! assert_eq!(cache.incr("answer", 1)?, 42);
//! assert_eq!(cache.incr("answer", 10)?, 52);
//! assert_eq!(cache.get("answer")?.and_then(|v| v.as_int()), Some(52));
//! # Ok(())
//! # }
//! ```
//!
//! ## Versions
//!
//! Keys are built with the cache's default version. To address another
//! version for some calls, derive a view with [`RedisCache::with_version`];
//! it shares the pool and differs only in the version it writes under.

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use redis::{Cmd, RedisError, Script};
use redstash_core::{CacheKey, Expiry, Format, KeyFunction, Timeout, Value, ValueCodec};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::metrics::{Timer, record_command, record_lookups};
use crate::pool::{ConnectionParams, ConnectionPool, PoolRegistry, PooledConnection};
use crate::settings::{CacheSettings, DEFAULT_TIMEOUT, DbSetting, ParserClass, PoolOptions};

/// Blocking Redis cache with versioned keys and native integer counters.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct RedisCache {
    pool: ConnectionPool,
    keys: KeyFunction,
    codec: ValueCodec,
    default_timeout: Timeout,
}

impl RedisCache {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> RedisCacheBuilder {
        RedisCacheBuilder::default()
    }

    /// Creates a cache from settings, resolving every option now.
    ///
    /// Fails with [`Error::Config`] for invalid settings. The pool is taken
    /// from `registry`, shared with every other cache of the same identity.
    pub fn from_settings(settings: &CacheSettings, registry: &PoolRegistry) -> Result<Self> {
        Self::assemble(settings, None, None, registry)
    }

    fn assemble(
        settings: &CacheSettings,
        pool_options: Option<PoolOptions>,
        format: Option<Arc<dyn Format>>,
        registry: &PoolRegistry,
    ) -> Result<Self> {
        let mut params = ConnectionParams::resolve(&settings.location, &settings.options)?;
        if let Some(options) = pool_options {
            options.validate()?;
            params.pool_options = options;
        }
        let format = match format {
            Some(format) => format,
            None => settings.options.serializer()?.format(),
        };

        let pool = registry.get_connection_pool(&params)?;
        debug!(
            identity = %params.identity,
            prefix = %settings.key_prefix,
            version = settings.version,
            "Redis cache ready"
        );

        Ok(Self {
            pool,
            keys: KeyFunction::new(settings.key_prefix.as_str(), settings.version),
            codec: ValueCodec::new(format),
            default_timeout: Timeout::from_seconds(settings.timeout),
        })
    }

    /// Returns a view of this cache whose default version is `version`.
    #[must_use]
    pub fn with_version(&self, version: i64) -> Self {
        Self {
            keys: KeyFunction::new(self.keys.prefix(), version),
            ..self.clone()
        }
    }

    /// The shared connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The key function (prefix and default version).
    pub fn key_function(&self) -> &KeyFunction {
        &self.keys
    }

    /// The value codec.
    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Timeout applied when a write passes [`Timeout::Default`].
    pub fn default_timeout(&self) -> Timeout {
        self.default_timeout
    }

    /// Builds the storage key for `key` at this cache's version.
    pub fn make_key(&self, key: &str) -> CacheKey {
        self.keys.make_key(key, None)
    }

    fn connection(&self) -> Result<PooledConnection> {
        self.pool.get()
    }

    fn observe<T>(&self, operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let timer = Timer::new();
        let result = f();
        record_command(operation, &timer, &result);
        if let Err(err) = &result {
            debug!(operation, error = %err, "Cache operation failed");
        }
        result
    }

    /// Stores `value` unless `key` already holds one.
    ///
    /// Returns `true` if the value was written.
    pub fn add(&self, key: &str, value: impl Into<Value>, timeout: Timeout) -> Result<bool> {
        let key = self.make_key(key);
        let value = value.into();
        self.observe("add", || self.store(&key, &value, timeout, true))
    }

    /// Stores `value` under `key`.
    ///
    /// Returns `false` without writing when the timeout resolves to zero or
    /// a negative number of seconds.
    pub fn set(&self, key: &str, value: impl Into<Value>, timeout: Timeout) -> Result<bool> {
        let key = self.make_key(key);
        let value = value.into();
        self.observe("set", || self.store(&key, &value, timeout, false))
    }

    fn store(&self, key: &CacheKey, value: &Value, timeout: Timeout, only_if_absent: bool) -> Result<bool> {
        let expiry = timeout.resolve(self.default_timeout);
        if expiry == Expiry::Discard {
            trace!(%key, "Timeout is not positive, skipping write");
            return Ok(false);
        }
        let payload = self.codec.encode(value)?.to_bytes();
        let mut con = self.connection()?;
        trace!(%key, ?expiry, only_if_absent, "SET");
        let reply: redis::Value =
            write_command(key, &payload, expiry, only_if_absent).query(&mut *con)?;
        Ok(!matches!(reply, redis::Value::Nil))
    }

    /// Fetches the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = self.make_key(key);
        self.observe("get", || {
            let mut con = self.connection()?;
            trace!(%key, "GET");
            let raw: Option<Vec<u8>> = redis::cmd("GET").arg(key.as_str()).query(&mut *con)?;
            record_lookups(u64::from(raw.is_some()), u64::from(raw.is_none()));
            Ok(raw.map(|raw| self.codec.decode(&raw)).transpose()?)
        })
    }

    /// Fetches the value stored under `key`, or returns `default`.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// Returns the cached value, or stores and returns the one produced by
    /// `default`.
    ///
    /// When another client stores a value first, that value is returned.
    pub fn get_or_set<F, V>(&self, key: &str, default: F, timeout: Timeout) -> Result<Value>
    where
        F: FnOnce() -> V,
        V: Into<Value>,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = default().into();
        self.add(key, value.clone(), timeout)?;
        Ok(self.get(key)?.unwrap_or(value))
    }

    /// Removes `key`. Returns `true` if it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let key = self.make_key(key);
        self.observe("delete", || {
            let mut con = self.connection()?;
            trace!(%key, "DEL");
            let deleted: i64 = redis::cmd("DEL").arg(key.as_str()).query(&mut *con)?;
            Ok(deleted > 0)
        })
    }

    /// Removes every key in `keys` with a single command. Returns the number
    /// of keys that existed.
    pub fn delete_many<I, K>(&self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let built: Vec<CacheKey> = keys.into_iter().map(|k| self.make_key(k.as_ref())).collect();
        if built.is_empty() {
            return Ok(0);
        }
        self.observe("delete_many", || {
            let mut cmd = redis::cmd("DEL");
            for key in &built {
                cmd.arg(key.as_str());
            }
            let mut con = self.connection()?;
            trace!(count = built.len(), "DEL");
            let deleted: u64 = cmd.query(&mut *con)?;
            Ok(deleted)
        })
    }

    /// Fetches several keys with one `MGET`.
    ///
    /// The result is keyed by the keys as passed in, in input order, and
    /// omits keys without a value.
    pub fn get_many<I, K>(&self, keys: I) -> Result<IndexMap<String, Value>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let originals: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_owned()).collect();
        if originals.is_empty() {
            return Ok(IndexMap::new());
        }
        self.observe("get_many", || {
            let mut cmd = redis::cmd("MGET");
            for key in &originals {
                cmd.arg(self.make_key(key).as_str());
            }
            let mut con = self.connection()?;
            trace!(count = originals.len(), "MGET");
            let raws: Vec<Option<Vec<u8>>> = cmd.query(&mut *con)?;
            let requested = raws.len() as u64;

            let mut found = IndexMap::with_capacity(raws.len());
            for (original, raw) in originals.into_iter().zip(raws) {
                if let Some(raw) = raw {
                    let value = self.codec.decode(&raw)?;
                    found.insert(original, value);
                }
            }
            let hits = found.len() as u64;
            record_lookups(hits, requested.saturating_sub(hits));
            Ok(found)
        })
    }

    /// Stores every pair in one atomic pipeline.
    ///
    /// All values are encoded before anything is sent, so an encoding
    /// failure writes nothing.
    pub fn set_many<I, K, V>(&self, data: I, timeout: Timeout) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let expiry = timeout.resolve(self.default_timeout);
        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut queued = 0usize;
        for (key, value) in data {
            if expiry == Expiry::Discard {
                continue;
            }
            let key = self.make_key(key.as_ref());
            let payload = self.codec.encode(&value.into())?.to_bytes();
            pipe.add_command(write_command(&key, &payload, expiry, false))
                .ignore();
            queued += 1;
        }
        if queued == 0 {
            return Ok(());
        }
        self.observe("set_many", || {
            let mut con = self.connection()?;
            trace!(count = queued, ?expiry, "MULTI SET");
            pipe.query::<()>(&mut *con)?;
            Ok(())
        })
    }

    /// Adds `delta` to the integer stored under `key` and returns the result.
    ///
    /// Fails with [`Error::KeyNotFound`] if the key has no value; a counter is
    /// never created implicitly. Values that Redis cannot increment (stored
    /// through the format rather than natively) are read, updated and
    /// written back as native integers, keeping their TTL.
    pub fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let key = self.make_key(key);
        self.observe("incr", || self.increment(&key, delta))
    }

    /// Subtracts `delta` from the integer stored under `key`.
    pub fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        let key = self.make_key(key);
        self.observe("decr", || {
            let delta = delta.checked_neg().ok_or_else(|| Error::Overflow(key.clone()))?;
            self.increment(&key, delta)
        })
    }

    fn increment(&self, key: &CacheKey, delta: i64) -> Result<i64> {
        let mut con = self.connection()?;
        trace!(%key, delta, "INCRBY if exists");
        match INCR_EXISTING
            .key(key.as_str())
            .arg(delta)
            .invoke::<Option<i64>>(&mut *con)
        {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::KeyNotFound(key.clone())),
            Err(err) if is_rejected_increment(&err) => {
                debug!(%key, delta, error = %err, "Native increment refused, updating in place");
                self.increment_in_place(&mut con, key, delta)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn increment_in_place(&self, con: &mut PooledConnection, key: &CacheKey, delta: i64) -> Result<i64> {
        let raw: Option<Vec<u8>> = redis::cmd("GET").arg(key.as_str()).query(&mut **con)?;
        let raw = raw.ok_or_else(|| Error::KeyNotFound(key.clone()))?;
        let current = match self.codec.decode(&raw)? {
            Value::Int(current) => current,
            other => {
                return Err(Error::NotAnInteger {
                    key: key.clone(),
                    found: other.kind(),
                });
            }
        };
        let value = current
            .checked_add(delta)
            .ok_or_else(|| Error::Overflow(key.clone()))?;
        // XX: a key that expired since the GET stays gone.
        let reply: redis::Value = redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("XX")
            .arg("KEEPTTL")
            .query(&mut **con)?;
        if matches!(reply, redis::Value::Nil) {
            return Err(Error::KeyNotFound(key.clone()));
        }
        Ok(value)
    }

    /// Seconds until `key` expires.
    ///
    /// Returns `Some(0)` if the key does not exist, `None` if it exists
    /// without an expiry, and `Some(n)` otherwise.
    pub fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let key = self.make_key(key);
        self.observe("ttl", || {
            let mut con = self.connection()?;
            let reply: i64 = redis::cmd("TTL").arg(key.as_str()).query(&mut *con)?;
            Ok(match reply {
                -1 => None,
                n if n >= 0 => Some(n.unsigned_abs()),
                _ => Some(0),
            })
        })
    }

    /// Returns `true` if `key` has a value. The value is not fetched.
    pub fn has_key(&self, key: &str) -> Result<bool> {
        let key = self.make_key(key);
        self.observe("has_key", || {
            let mut con = self.connection()?;
            let exists: bool = redis::cmd("EXISTS").arg(key.as_str()).query(&mut *con)?;
            Ok(exists)
        })
    }

    /// Updates the expiry of an existing key. Returns `true` if the key
    /// existed. A zero or negative timeout deletes the key.
    pub fn touch(&self, key: &str, timeout: Timeout) -> Result<bool> {
        let key = self.make_key(key);
        self.observe("touch", || {
            let mut con = self.connection()?;
            let touched = match timeout.resolve(self.default_timeout) {
                Expiry::After(seconds) => redis::cmd("EXPIRE")
                    .arg(key.as_str())
                    .arg(seconds)
                    .query::<bool>(&mut *con)?,
                Expiry::Persist => {
                    let (exists, _persisted): (bool, bool) = redis::pipe()
                        .cmd("EXISTS")
                        .arg(key.as_str())
                        .cmd("PERSIST")
                        .arg(key.as_str())
                        .query(&mut *con)?;
                    exists
                }
                Expiry::Discard => redis::cmd("DEL").arg(key.as_str()).query::<i64>(&mut *con)? > 0,
            };
            Ok(touched)
        })
    }

    /// Removes every key in the selected Redis database.
    ///
    /// This is not limited to this cache's prefix or version; give each
    /// cache that needs isolation its own database.
    pub fn clear(&self) -> Result<()> {
        self.observe("clear", || {
            let mut con = self.connection()?;
            debug!(identity = %self.pool.identity(), "FLUSHDB");
            redis::cmd("FLUSHDB").query::<()>(&mut *con)?;
            Ok(())
        })
    }

    /// Moves `key` from this cache's version to `version + delta`, keeping
    /// its remaining TTL. Returns the new version.
    ///
    /// The value is copied and the old key deleted in one transaction.
    pub fn incr_version(&self, key: &str, delta: i64) -> Result<i64> {
        let version = self.keys.default_version();
        let old_key = self.keys.make_key(key, Some(version));
        self.observe("incr_version", || {
            let new_version = version
                .checked_add(delta)
                .ok_or_else(|| Error::Overflow(old_key.clone()))?;
            let new_key = self.keys.make_key(key, Some(new_version));

            let mut con = self.connection()?;
            let (raw, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
                .cmd("GET")
                .arg(old_key.as_str())
                .cmd("PTTL")
                .arg(old_key.as_str())
                .query(&mut *con)?;
            let raw = raw.ok_or_else(|| Error::KeyNotFound(old_key.clone()))?;
            if new_key == old_key {
                return Ok(new_version);
            }

            let mut set = redis::cmd("SET");
            set.arg(new_key.as_str()).arg(raw.as_slice());
            match pttl {
                -1 => {}
                -2 => return Err(Error::KeyNotFound(old_key.clone())),
                millis => {
                    set.arg("PX").arg(millis.max(1));
                }
            }
            trace!(from = %old_key, to = %new_key, pttl, "Moving key to new version");
            redis::pipe()
                .atomic()
                .add_command(set)
                .ignore()
                .cmd("DEL")
                .arg(old_key.as_str())
                .ignore()
                .query::<()>(&mut *con)?;
            Ok(new_version)
        })
    }

    /// Moves `key` from this cache's version to `version - delta`.
    pub fn decr_version(&self, key: &str, delta: i64) -> Result<i64> {
        let delta = delta
            .checked_neg()
            .ok_or_else(|| Error::Overflow(self.make_key(key)))?;
        self.incr_version(key, delta)
    }
}

fn write_command(key: &CacheKey, payload: &[u8], expiry: Expiry, only_if_absent: bool) -> Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key.as_str()).arg(payload);
    if let Expiry::After(seconds) = expiry {
        cmd.arg("EX").arg(seconds);
    }
    if only_if_absent {
        cmd.arg("NX");
    }
    cmd
}

// INCRBY that never creates the key. Returns nil for a missing key.
static INCR_EXISTING: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end
return redis.call('INCRBY', KEYS[1], ARGV[1])
",
    )
});

// Redis answers INCRBY on a non-integer (or overflowing) value with a plain
// `ERR` reply; anything else is a real failure.
fn is_rejected_increment(err: &RedisError) -> bool {
    err.code() == Some("ERR")
}

/// Builder for [`RedisCache`].
///
/// ```
/// use std::time::Duration;
/// use redstash_redis::{PoolOptions, PoolRegistry, RedisCache, Timeout};
///
/// let registry = PoolRegistry::new();
/// let cache = RedisCache::builder()
///     .server("/var/run/redis/redis.sock")
///     .db(0)
///     .key_prefix("sessions")
///     .timeout(Timeout::Seconds(3600))
///     .pool_options(PoolOptions {
///         max_connections: 4,
///         connection_timeout: Duration::from_secs(1),
///         ..PoolOptions::default()
///     })
///     .build(&registry)
///     .unwrap();
///
/// assert_eq!(cache.make_key("abc"), "sessions:1:abc");
/// assert_eq!(cache.pool().max_connections(), 4);
/// ```
pub struct RedisCacheBuilder {
    settings: CacheSettings,
    pool_options: Option<PoolOptions>,
    format: Option<Arc<dyn Format>>,
}

impl Default for RedisCacheBuilder {
    fn default() -> Self {
        Self {
            settings: CacheSettings::new("127.0.0.1:6379"),
            pool_options: None,
            format: None,
        }
    }
}

impl RedisCacheBuilder {
    /// Starts from existing settings.
    pub fn from_settings(settings: CacheSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Set the server location: `"host:port"` or a Unix socket path.
    pub fn server(mut self, location: impl Into<String>) -> Self {
        self.settings.location = location.into();
        self
    }

    /// Set the Redis database.
    pub fn db(mut self, db: i64) -> Self {
        self.settings.options.db = Some(DbSetting::Integer(db));
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.settings.options.password = Some(password.into());
        self
    }

    /// Set the reply protocol.
    pub fn parser_class(mut self, parser: ParserClass) -> Self {
        self.settings.options.parser_class = Some(parser.name().to_owned());
        self
    }

    /// Set the pool class by its registered name.
    pub fn pool_class(mut self, name: impl Into<String>) -> Self {
        self.settings.options.connection_pool_class = Some(name.into());
        self
    }

    /// Set the pool arguments.
    pub fn pool_options(mut self, options: PoolOptions) -> Self {
        self.pool_options = Some(options);
        self
    }

    /// Set the default timeout for writes.
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.settings.timeout = match timeout {
            Timeout::Default => Some(DEFAULT_TIMEOUT),
            Timeout::Never => None,
            Timeout::Seconds(seconds) => Some(seconds),
        };
        self
    }

    /// Set the key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.key_prefix = prefix.into();
        self
    }

    /// Set the default key version.
    pub fn version(mut self, version: i64) -> Self {
        self.settings.version = version;
        self
    }

    /// Set the value format by name (`bincode` or `json`).
    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.settings.options.serializer = Some(name.into());
        self
    }

    /// Set a custom value format, overriding the serializer name.
    pub fn value_format(mut self, format: Arc<dyn Format>) -> Self {
        self.format = Some(format);
        self
    }

    /// Create the cache, resolving all settings.
    pub fn build(self, registry: &PoolRegistry) -> Result<RedisCache> {
        RedisCache::assemble(&self.settings, self.pool_options, self.format, registry)
    }
}
