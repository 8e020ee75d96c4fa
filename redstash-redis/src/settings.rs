//! Cache configuration.
//!
//! [`CacheSettings`] mirrors a Django `CACHES` entry and can be read from
//! YAML or JSON:
//!
//! ```
//! use redstash_redis::settings::{CacheSettings, ServerAddress};
//!
//! let settings = CacheSettings::from_yaml(r#"
//! LOCATION: "127.0.0.1:6379"
//! TIMEOUT: 60
//! OPTIONS:
//!   DB: 2
//!   CONNECTION_POOL_CLASS_KWARGS:
//!     max_connections: 4
//! "#).unwrap();
//!
//! assert_eq!(settings.timeout, Some(60));
//! assert_eq!(settings.options.db(), Ok(2));
//! assert_eq!(
//!     ServerAddress::parse(&settings.location),
//!     Ok(ServerAddress::Tcp { host: "127.0.0.1".into(), port: 6379 }),
//! );
//! ```
//!
//! Every value is validated when a cache is constructed from the settings;
//! nothing is deferred to the first command.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use redstash_core::{BincodeFormat, Format, JsonFormat};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Timeout applied to writes when `TIMEOUT` is absent.
pub const DEFAULT_TIMEOUT: i64 = 300;
/// Database selected when `OPTIONS.DB` is absent.
pub const DEFAULT_DB: i64 = 1;
/// Name of the pool class used when `CONNECTION_POOL_CLASS` is absent.
pub const DEFAULT_POOL_CLASS: &str = "blocking";

/// Errors detected while resolving a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The settings document could not be parsed.
    #[error("invalid cache settings: {0}")]
    Parse(String),

    /// `LOCATION` is empty.
    #[error("cache LOCATION must not be empty")]
    EmptyLocation,

    /// The port part of `LOCATION` is not a valid port number.
    #[error("invalid port {0:?} in cache LOCATION, expected an integer")]
    InvalidPort(String),

    /// `OPTIONS.DB` is not a non-negative integer.
    #[error("invalid DB {0:?} in cache OPTIONS, expected a non-negative integer")]
    InvalidDb(String),

    /// `OPTIONS.PARSER_CLASS` does not name a known parser.
    #[error("unknown PARSER_CLASS {0:?}, expected one of: resp2, resp3")]
    UnknownParserClass(String),

    /// `OPTIONS.CONNECTION_POOL_CLASS` is not registered.
    #[error("unknown CONNECTION_POOL_CLASS {0:?}")]
    UnknownPoolClass(String),

    /// `OPTIONS.CONNECTION_POOL_CLASS_KWARGS` was rejected.
    #[error("invalid CONNECTION_POOL_CLASS_KWARGS: {0}")]
    InvalidPoolKwargs(String),

    /// `OPTIONS.SERIALIZER` does not name a known format.
    #[error("unknown SERIALIZER {0:?}, expected one of: bincode, json")]
    UnknownSerializer(String),

    /// The connection parameters could not be turned into a client.
    #[error("invalid connection parameters: {0}")]
    InvalidConnection(String),
}

/// Top level cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CacheSettings {
    /// `"host:port"` or a Unix socket path.
    pub location: String,
    /// Default expiry in seconds. `None` keeps entries forever.
    #[serde(default = "default_timeout")]
    pub timeout: Option<i64>,
    /// Prefix of every key.
    #[serde(default)]
    pub key_prefix: String,
    /// Default key version.
    #[serde(default = "default_version")]
    pub version: i64,
    /// Connection options.
    #[serde(default)]
    pub options: CacheOptions,
}

fn default_timeout() -> Option<i64> {
    Some(DEFAULT_TIMEOUT)
}

fn default_version() -> i64 {
    1
}

impl CacheSettings {
    /// Creates settings for `location` with every other field defaulted.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            timeout: default_timeout(),
            key_prefix: String::new(),
            version: default_version(),
            options: CacheOptions::default(),
        }
    }

    /// Parses settings from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_saphyr::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// The `OPTIONS` sub-map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CacheOptions {
    /// Redis logical database.
    #[serde(default)]
    pub db: Option<DbSetting>,
    /// Password sent with `AUTH`.
    #[serde(default)]
    pub password: Option<String>,
    /// Reply parser, see [`ParserClass`].
    #[serde(default)]
    pub parser_class: Option<String>,
    /// Registered pool class name.
    #[serde(default)]
    pub connection_pool_class: Option<String>,
    /// Arguments for the pool class, see [`PoolOptions`].
    #[serde(default)]
    pub connection_pool_class_kwargs: Option<serde_json::Map<String, serde_json::Value>>,
    /// Blob format, see [`SerializerClass`].
    #[serde(default)]
    pub serializer: Option<String>,
}

impl CacheOptions {
    /// Resolves `DB`, defaulting to [`DEFAULT_DB`].
    ///
    /// Negative numbers are rejected.
    pub fn db(&self) -> Result<i64, ConfigError> {
        let db = match &self.db {
            None => return Ok(DEFAULT_DB),
            Some(DbSetting::Integer(db)) => *db,
            Some(DbSetting::Text(text)) => text
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidDb(text.clone()))?,
        };
        if db < 0 {
            return Err(ConfigError::InvalidDb(db.to_string()));
        }
        Ok(db)
    }

    /// Resolves `PARSER_CLASS`.
    pub fn parser_class(&self) -> Result<ParserClass, ConfigError> {
        self.parser_class
            .as_deref()
            .map_or(Ok(ParserClass::default()), |name| name.parse())
    }

    /// Returns `CONNECTION_POOL_CLASS` or the default name. The name is
    /// checked against the registry when the cache is built.
    pub fn pool_class(&self) -> &str {
        self.connection_pool_class
            .as_deref()
            .unwrap_or(DEFAULT_POOL_CLASS)
    }

    /// Resolves `CONNECTION_POOL_CLASS_KWARGS`.
    pub fn pool_options(&self) -> Result<PoolOptions, ConfigError> {
        match &self.connection_pool_class_kwargs {
            None => Ok(PoolOptions::default()),
            Some(kwargs) => serde_json::from_value(serde_json::Value::Object(kwargs.clone()))
                .map_err(|e| ConfigError::InvalidPoolKwargs(e.to_string())),
        }
    }

    /// Resolves `SERIALIZER`.
    pub fn serializer(&self) -> Result<SerializerClass, ConfigError> {
        self.serializer
            .as_deref()
            .map_or(Ok(SerializerClass::default()), |name| name.parse())
    }
}

/// `DB` as written in the settings: a number or a numeric string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbSetting {
    /// `DB: 2`
    Integer(i64),
    /// `DB: "2"`, validated on resolution.
    Text(String),
}

/// Where the Redis server listens.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServerAddress {
    /// TCP endpoint.
    Tcp {
        /// Host name or IP address.
        host: SmolStr,
        /// TCP port.
        port: u16,
    },
    /// Unix domain socket.
    Unix(PathBuf),
}

impl ServerAddress {
    /// Parses a `LOCATION`.
    ///
    /// A location containing a colon is `host:port` (split at the last
    /// colon, so bracketed IPv6 hosts work); anything else is a socket path.
    pub fn parse(location: &str) -> Result<Self, ConfigError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(ConfigError::EmptyLocation);
        }
        match location.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort(port.to_owned()))?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                Ok(ServerAddress::Tcp {
                    host: SmolStr::new(host),
                    port,
                })
            }
            None => Ok(ServerAddress::Unix(PathBuf::from(location))),
        }
    }

    /// Returns `true` for a Unix socket address.
    pub fn is_unix(&self) -> bool {
        matches!(self, ServerAddress::Unix(_))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            ServerAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            ServerAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Reply protocol spoken on each connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ParserClass {
    /// RESP2, understood by every Redis version.
    #[default]
    Resp2,
    /// RESP3, Redis 6 and newer.
    Resp3,
}

impl ParserClass {
    /// Registry name of the parser.
    pub fn name(self) -> &'static str {
        match self {
            ParserClass::Resp2 => "resp2",
            ParserClass::Resp3 => "resp3",
        }
    }
}

impl FromStr for ParserClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resp2" | "default" => Ok(ParserClass::Resp2),
            "resp3" => Ok(ParserClass::Resp3),
            _ => Err(ConfigError::UnknownParserClass(s.to_owned())),
        }
    }
}

/// Blob format used for non-integer values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerializerClass {
    /// [`redstash_core::BincodeFormat`]
    #[default]
    Bincode,
    /// [`redstash_core::JsonFormat`]
    Json,
}

impl SerializerClass {
    /// Returns the format implementing this serializer.
    pub fn format(self) -> Arc<dyn Format> {
        match self {
            SerializerClass::Bincode => Arc::new(BincodeFormat),
            SerializerClass::Json => Arc::new(JsonFormat),
        }
    }
}

impl FromStr for SerializerClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(SerializerClass::Bincode),
            "json" => Ok(SerializerClass::Json),
            _ => Err(ConfigError::UnknownSerializer(s.to_owned())),
        }
    }
}

/// Arguments accepted by the built-in pool classes.
///
/// Durations are given in seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolOptions {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Idle connections kept open. `None` means `max_connections`.
    pub min_idle: Option<u32>,
    /// How long an operation waits for a free connection before failing.
    #[serde(with = "seconds")]
    pub connection_timeout: Duration,
    /// Idle connections older than this are closed.
    #[serde(with = "optional_seconds")]
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are closed.
    #[serde(with = "optional_seconds")]
    pub max_lifetime: Option<Duration>,
    /// Send `PING` before handing out a connection.
    pub test_on_check_out: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_idle: Some(0),
            connection_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
            test_on_check_out: true,
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
