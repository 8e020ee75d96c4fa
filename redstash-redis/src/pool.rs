//! Shared connection pools.
//!
//! Every [`RedisCache`](crate::RedisCache) borrows its connections from a
//! [`ConnectionPool`] handed out by a [`PoolRegistry`]. The registry keys
//! pools by [`ConnectionIdentity`], so caches pointing at the same server,
//! database, parser and pool class share one pool instead of opening their
//! own sockets.
//!
//! The registry is an ordinary value: create one at startup and pass it to
//! every cache that should share connections.
//!
//! ```
//! use redstash_redis::{PoolRegistry, RedisCache};
//!
//! let registry = PoolRegistry::new();
//! let a = RedisCache::builder().server("127.0.0.1:6379").db(3).build(&registry).unwrap();
//! let b = RedisCache::builder().server("127.0.0.1:6379").db(3).build(&registry).unwrap();
//! let c = RedisCache::builder().server("127.0.0.1:6379").db(4).build(&registry).unwrap();
//!
//! assert!(a.pool().ptr_eq(b.pool()));
//! assert!(!a.pool().ptr_eq(c.pool()));
//! assert_eq!(registry.len(), 2);
//! ```
//!
//! Pool classes replace import-by-path: a class is a named [`PoolFactory`]
//! registered on the registry. Two are built in:
//!
//! | Name | Behaviour |
//! |------|-----------|
//! | `blocking` | Default. Connections are opened on demand. |
//! | `eager` | Opens `min_idle` connections (at least one) up front and fails construction if the server is unreachable. |

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use r2d2::{HandleError, ManageConnection};
use redis::{Client, Connection, ConnectionLike, RedisError};
use smol_str::SmolStr;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::settings::{CacheOptions, ConfigError, ParserClass, PoolOptions, ServerAddress};

/// A connection checked out of a [`ConnectionPool`].
pub type PooledConnection = r2d2::PooledConnection<RedisConnectionManager>;

/// Builds the underlying pool for a pool class.
///
/// The builder arrives configured from [`PoolOptions`]; a class may adjust it
/// further before building.
pub type PoolFactory = fn(
    r2d2::Builder<RedisConnectionManager>,
    RedisConnectionManager,
    &PoolOptions,
) -> std::result::Result<r2d2::Pool<RedisConnectionManager>, r2d2::Error>;

/// Fields that decide whether two caches share a pool.
///
/// The password and the pool arguments are deliberately absent: the first
/// cache to request an identity decides them for everyone sharing it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    /// TCP endpoint or Unix socket.
    pub address: ServerAddress,
    /// Logical database.
    pub db: i64,
    /// Reply protocol.
    pub parser: ParserClass,
    /// Registered pool class name.
    pub pool_class: SmolStr,
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}, {})",
            self.address,
            self.db,
            self.parser.name(),
            self.pool_class
        )
    }
}

/// Fully resolved connection parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionParams {
    /// Pool sharing key.
    pub identity: ConnectionIdentity,
    /// Password sent with `AUTH`.
    pub password: Option<String>,
    /// Arguments for the pool class.
    pub pool_options: PoolOptions,
}

impl ConnectionParams {
    /// Resolves `location` and the connection related `OPTIONS`.
    pub fn resolve(location: &str, options: &CacheOptions) -> Result<Self, ConfigError> {
        let address = ServerAddress::parse(location)?;
        let pool_options = options.pool_options()?;
        pool_options.validate()?;
        Ok(Self {
            identity: ConnectionIdentity {
                address,
                db: options.db()?,
                parser: options.parser_class()?,
                pool_class: SmolStr::new(options.pool_class()),
            },
            password: options.password.clone(),
            pool_options,
        })
    }

    /// Builds the `redis://` or `redis+unix://` URL understood by the client.
    pub fn connection_url(&self) -> Result<Url, ConfigError> {
        let invalid = |e: url::ParseError| ConfigError::InvalidConnection(e.to_string());
        let identity = &self.identity;
        let mut url = match &identity.address {
            ServerAddress::Tcp { .. } => {
                let mut url = Url::parse(&format!("redis://{}/{}", identity.address, identity.db))
                    .map_err(invalid)?;
                if let Some(password) = &self.password {
                    url.set_password(Some(password)).map_err(|()| {
                        ConfigError::InvalidConnection("password requires a host".to_owned())
                    })?;
                }
                url
            }
            ServerAddress::Unix(path) => {
                let mut url = Url::parse("redis+unix:///").map_err(invalid)?;
                url.set_path(&path.to_string_lossy());
                url.query_pairs_mut()
                    .append_pair("db", &identity.db.to_string());
                if let Some(password) = &self.password {
                    url.query_pairs_mut().append_pair("pass", password);
                }
                url
            }
        };
        if identity.parser == ParserClass::Resp3 {
            url.query_pairs_mut().append_pair("protocol", "resp3");
        }
        Ok(url)
    }
}

impl PoolOptions {
    /// Rejects values the pool would refuse to start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::InvalidPoolKwargs(message.to_owned()));
        if self.max_connections == 0 {
            return invalid("max_connections must be positive");
        }
        if self.min_idle.is_some_and(|min_idle| min_idle > self.max_connections) {
            return invalid("min_idle must not exceed max_connections");
        }
        if self.connection_timeout.is_zero() {
            return invalid("connection_timeout must be positive");
        }
        if self.idle_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return invalid("idle_timeout must be positive");
        }
        if self.max_lifetime.is_some_and(|lifetime| lifetime.is_zero()) {
            return invalid("max_lifetime must be positive");
        }
        Ok(())
    }

    /// Returns an r2d2 builder configured from these options.
    pub fn builder(&self, address: &ServerAddress) -> r2d2::Builder<RedisConnectionManager> {
        r2d2::Pool::builder()
            .max_size(self.max_connections)
            .min_idle(self.min_idle)
            .connection_timeout(self.connection_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            .test_on_check_out(self.test_on_check_out)
            .error_handler(Box::new(TracingErrorHandler {
                address: SmolStr::new(address.to_string()),
            }))
    }
}

/// Opens Redis connections for r2d2.
#[derive(Clone, Debug)]
pub struct RedisConnectionManager {
    client: Client,
}

impl RedisConnectionManager {
    /// Creates a manager for the given parameters. Nothing is connected yet.
    pub fn new(params: &ConnectionParams) -> Result<Self, ConfigError> {
        let url = params.connection_url()?;
        let client = Client::open(url.as_str())
            .map_err(|e| ConfigError::InvalidConnection(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ManageConnection for RedisConnectionManager {
    type Connection = Connection;
    type Error = RedisError;

    fn connect(&self) -> std::result::Result<Connection, RedisError> {
        trace!("Open new redis connection");
        self.client.get_connection()
    }

    fn is_valid(&self, conn: &mut Connection) -> std::result::Result<(), RedisError> {
        redis::cmd("PING").query::<()>(conn)
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        !conn.is_open()
    }
}

#[derive(Debug)]
struct TracingErrorHandler {
    address: SmolStr,
}

impl HandleError<RedisError> for TracingErrorHandler {
    fn handle_error(&self, error: RedisError) {
        warn!(address = %self.address, error = %error, "Redis connection pool error");
    }
}

/// A shared pool of connections to one Redis database.
///
/// Cloning is cheap and clones refer to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    identity: ConnectionIdentity,
    pool: r2d2::Pool<RedisConnectionManager>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("identity", &self.inner.identity)
            .field("state", &self.inner.pool.state())
            .finish()
    }
}

impl ConnectionPool {
    fn build(params: &ConnectionParams, factory: PoolFactory) -> Result<Self> {
        let manager = RedisConnectionManager::new(params)?;
        let builder = params.pool_options.builder(&params.identity.address);
        let pool = factory(builder, manager, &params.pool_options)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                identity: params.identity.clone(),
                pool,
            }),
        })
    }

    /// Checks out a connection, waiting at most the configured connection
    /// timeout.
    pub fn get(&self) -> Result<PooledConnection> {
        let pool = &self.inner.pool;
        pool.get().map_err(|err| {
            let state = pool.state();
            if state.connections >= pool.max_size() && state.idle_connections == 0 {
                Error::PoolExhausted {
                    max_connections: pool.max_size(),
                }
            } else {
                Error::Pool(err)
            }
        })
    }

    /// The identity this pool was created for.
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.inner.identity
    }

    /// Maximum number of open connections.
    pub fn max_connections(&self) -> u32 {
        self.inner.pool.max_size()
    }

    /// Current number of open and idle connections.
    pub fn state(&self) -> r2d2::State {
        self.inner.pool.state()
    }

    /// Returns `true` if both handles refer to the same pool.
    pub fn ptr_eq(&self, other: &ConnectionPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn blocking_pool(
    builder: r2d2::Builder<RedisConnectionManager>,
    manager: RedisConnectionManager,
    _options: &PoolOptions,
) -> std::result::Result<r2d2::Pool<RedisConnectionManager>, r2d2::Error> {
    Ok(builder.build_unchecked(manager))
}

// Always opens at least one connection so an unreachable server fails here.
fn eager_pool(
    builder: r2d2::Builder<RedisConnectionManager>,
    manager: RedisConnectionManager,
    options: &PoolOptions,
) -> std::result::Result<r2d2::Pool<RedisConnectionManager>, r2d2::Error> {
    let min_idle = options.min_idle.unwrap_or(options.max_connections).max(1);
    builder.min_idle(Some(min_idle)).build(manager)
}

/// Process-scoped registry of connection pools and pool classes.
///
/// Create one per process (or per isolated test) and share it by reference.
/// Each identity owns a slot. The map lock is only held to find or insert
/// the slot; the pool itself is built under the slot's own lock, so
/// concurrent first requests for one identity still produce one pool while
/// other identities are not held up by a slow `eager` connect.
pub struct PoolRegistry {
    classes: DashMap<SmolStr, PoolFactory>,
    pools: DashMap<ConnectionIdentity, Arc<PoolSlot>>,
}

#[derive(Default)]
struct PoolSlot {
    building: Mutex<()>,
    pool: OnceLock<ConnectionPool>,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("classes", &self.class_names())
            .field("pools", &self.len())
            .finish()
    }
}

impl PoolRegistry {
    /// Creates an empty registry with the built-in pool classes.
    pub fn new() -> Self {
        let classes = DashMap::new();
        classes.insert(SmolStr::new_static("blocking"), blocking_pool as PoolFactory);
        classes.insert(SmolStr::new_static("eager"), eager_pool as PoolFactory);
        Self {
            classes,
            pools: DashMap::new(),
        }
    }

    /// Registers (or replaces) a pool class under `name`.
    pub fn register_pool_class(&self, name: impl Into<SmolStr>, factory: PoolFactory) {
        self.classes.insert(name.into(), factory);
    }

    /// Returns `true` if `name` is a registered pool class.
    pub fn has_pool_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Names of all registered pool classes, sorted.
    pub fn class_names(&self) -> Vec<SmolStr> {
        let mut names: Vec<_> = self.classes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn pool_class(&self, name: &str) -> Result<PoolFactory, ConfigError> {
        self.classes
            .get(name)
            .map(|factory| *factory.value())
            .ok_or_else(|| ConfigError::UnknownPoolClass(name.to_owned()))
    }

    /// Returns the pool for `params.identity`, creating it on first use.
    ///
    /// A failed build leaves no pool behind; the next request retries.
    pub fn get_connection_pool(&self, params: &ConnectionParams) -> Result<ConnectionPool> {
        let factory = self.pool_class(&params.identity.pool_class)?;
        let slot = Arc::clone(&self.pools.entry(params.identity.clone()).or_default());

        if let Some(pool) = slot.pool.get() {
            trace!(identity = %params.identity, "Reusing connection pool");
            return Ok(pool.clone());
        }
        let _building = slot.building.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = slot.pool.get() {
            trace!(identity = %params.identity, "Reusing connection pool");
            return Ok(pool.clone());
        }

        debug!(
            identity = %params.identity,
            max_connections = params.pool_options.max_connections,
            "Creating connection pool"
        );
        let pool = ConnectionPool::build(params, factory)?;
        Ok(slot.pool.get_or_init(|| pool).clone())
    }

    /// Number of distinct pools created so far.
    pub fn len(&self) -> usize {
        self.pools
            .iter()
            .filter(|slot| slot.value().pool.get().is_some())
            .count()
    }

    /// Returns `true` if no pool has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
