use std::time::Duration;

use pretty_assertions::assert_eq;
use redstash_redis::{
    CacheSettings, ConfigError, ConnectionParams, Error, ParserClass, PoolOptions, PoolRegistry,
    RedisCache, SerializerClass, ServerAddress, Timeout,
};

#[test]
fn test_full_yaml() {
    let settings = CacheSettings::from_yaml(
        r#"
LOCATION: "redis.internal:6380"
TIMEOUT: 60
KEY_PREFIX: "shop"
VERSION: 4
OPTIONS:
  DB: "7"
  PASSWORD: "hunter2"
  PARSER_CLASS: resp3
  CONNECTION_POOL_CLASS: eager
  CONNECTION_POOL_CLASS_KWARGS:
    max_connections: 20
    connection_timeout: 0.5
    idle_timeout: null
  SERIALIZER: json
"#,
    )
    .unwrap();

    assert_eq!(settings.timeout, Some(60));
    assert_eq!(settings.key_prefix, "shop");
    assert_eq!(settings.version, 4);

    let options = &settings.options;
    assert_eq!(options.db(), Ok(7));
    assert_eq!(options.password.as_deref(), Some("hunter2"));
    assert_eq!(options.parser_class(), Ok(ParserClass::Resp3));
    assert_eq!(options.pool_class(), "eager");
    assert_eq!(options.serializer(), Ok(SerializerClass::Json));
    assert_eq!(
        options.pool_options(),
        Ok(PoolOptions {
            max_connections: 20,
            connection_timeout: Duration::from_millis(500),
            idle_timeout: None,
            ..PoolOptions::default()
        })
    );
}

#[test]
fn test_defaults() {
    let settings = CacheSettings::from_yaml("LOCATION: /var/run/redis.sock").unwrap();

    assert_eq!(settings.timeout, Some(300));
    assert_eq!(settings.key_prefix, "");
    assert_eq!(settings.version, 1);
    assert_eq!(settings.options.db(), Ok(1));
    assert_eq!(settings.options.parser_class(), Ok(ParserClass::Resp2));
    assert_eq!(settings.options.pool_class(), "blocking");
    assert_eq!(settings.options.serializer(), Ok(SerializerClass::Bincode));
    assert_eq!(settings.options.pool_options(), Ok(PoolOptions::default()));
    assert_eq!(
        ServerAddress::parse(&settings.location),
        Ok(ServerAddress::Unix("/var/run/redis.sock".into()))
    );
}

#[test]
fn test_null_timeout_means_never() {
    let settings = CacheSettings::from_yaml("LOCATION: \"localhost:6379\"\nTIMEOUT: null").unwrap();
    assert_eq!(settings.timeout, None);

    let cache = RedisCache::from_settings(&settings, &PoolRegistry::new()).unwrap();
    assert_eq!(cache.default_timeout(), Timeout::Never);
}

#[test]
fn test_json() {
    let settings = CacheSettings::from_json(
        r#"{
            "LOCATION": "localhost:6379",
            "KEY_PREFIX": "api",
            "OPTIONS": {"DB": 0, "CONNECTION_POOL_CLASS_KWARGS": {"max_connections": 3}}
        }"#,
    )
    .unwrap();

    let cache = RedisCache::from_settings(&settings, &PoolRegistry::new()).unwrap();
    assert_eq!(cache.make_key("k"), "api:1:k");
    assert_eq!(cache.pool().identity().db, 0);
    assert_eq!(cache.pool().max_connections(), 3);
    assert_eq!(cache.default_timeout(), Timeout::Seconds(300));
}

#[test]
fn test_malformed_document() {
    assert!(matches!(
        CacheSettings::from_yaml("LOCATION: [unclosed"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        CacheSettings::from_json("{\"TIMEOUT\": 5}"),
        Err(ConfigError::Parse(_))
    ));
}

fn build_error(yaml: &str) -> ConfigError {
    let settings = CacheSettings::from_yaml(yaml).unwrap();
    let registry = PoolRegistry::new();
    match RedisCache::from_settings(&settings, &registry) {
        Err(Error::Config(err)) => {
            assert!(registry.is_empty(), "no pool is created for invalid settings");
            err
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn test_invalid_db() {
    assert_eq!(
        build_error("LOCATION: \"localhost:6379\"\nOPTIONS:\n  DB: primary"),
        ConfigError::InvalidDb("primary".into())
    );
}

#[test]
fn test_negative_db() {
    assert_eq!(
        build_error("LOCATION: \"localhost:6379\"\nOPTIONS:\n  DB: -1"),
        ConfigError::InvalidDb("-1".into())
    );
    assert_eq!(
        build_error("LOCATION: \"localhost:6379\"\nOPTIONS:\n  DB: \"-3\""),
        ConfigError::InvalidDb("-3".into())
    );
}

#[test]
fn test_invalid_port() {
    assert_eq!(
        build_error("LOCATION: \"localhost:redis\""),
        ConfigError::InvalidPort("redis".into())
    );
}

#[test]
fn test_unknown_parser_class() {
    assert_eq!(
        build_error("LOCATION: \"localhost:6379\"\nOPTIONS:\n  PARSER_CLASS: hiredis"),
        ConfigError::UnknownParserClass("hiredis".into())
    );
}

#[test]
fn test_unknown_serializer() {
    assert_eq!(
        build_error("LOCATION: \"localhost:6379\"\nOPTIONS:\n  SERIALIZER: pickle"),
        ConfigError::UnknownSerializer("pickle".into())
    );
}

#[test]
fn test_unknown_pool_kwarg() {
    let err = build_error(
        "LOCATION: \"localhost:6379\"\nOPTIONS:\n  CONNECTION_POOL_CLASS_KWARGS:\n    max_conns: 4",
    );
    assert!(matches!(err, ConfigError::InvalidPoolKwargs(ref msg) if msg.contains("max_conns")));
}

#[test]
fn test_connection_url_tcp() {
    let settings = CacheSettings::from_yaml(
        "LOCATION: \"10.0.0.5:6390\"\nOPTIONS:\n  DB: 2\n  PASSWORD: secret\n  PARSER_CLASS: resp3",
    )
    .unwrap();
    let params = ConnectionParams::resolve(&settings.location, &settings.options).unwrap();

    assert_eq!(
        params.connection_url().unwrap().as_str(),
        "redis://:secret@10.0.0.5:6390/2?protocol=resp3"
    );
}

#[test]
fn test_connection_url_unix() {
    let settings = CacheSettings::from_yaml(
        "LOCATION: /tmp/redis.sock\nOPTIONS:\n  DB: 4\n  PASSWORD: secret",
    )
    .unwrap();
    let params = ConnectionParams::resolve(&settings.location, &settings.options).unwrap();
    let url = params.connection_url().unwrap();

    assert_eq!(url.scheme(), "redis+unix");
    assert_eq!(url.path(), "/tmp/redis.sock");
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        query,
        [("db".to_owned(), "4".to_owned()), ("pass".to_owned(), "secret".to_owned())]
    );
}
