//! Pool sharing. None of these tests need a running server: the default
//! `blocking` pool class connects lazily.

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use redstash_redis::{
    ConfigError, Error, ParserClass, PoolOptions, PoolRegistry, RedisCache, RedisConnectionManager,
};

const LOCATION: &str = "127.0.0.1:6379";

fn single_connection_pool(
    builder: r2d2::Builder<RedisConnectionManager>,
    manager: RedisConnectionManager,
    _options: &PoolOptions,
) -> Result<r2d2::Pool<RedisConnectionManager>, r2d2::Error> {
    Ok(builder.max_size(1).build_unchecked(manager))
}

#[test]
fn test_same_identity_shares_pool() {
    let registry = PoolRegistry::new();
    let a = RedisCache::builder().server(LOCATION).db(3).build(&registry).unwrap();
    let b = RedisCache::builder()
        .server(LOCATION)
        .db(3)
        .key_prefix("other")
        .version(9)
        .timeout(redstash_redis::Timeout::Never)
        .build(&registry)
        .unwrap();

    assert!(a.pool().ptr_eq(b.pool()));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_password_and_kwargs_do_not_split_pools() {
    let registry = PoolRegistry::new();
    let a = RedisCache::builder().server(LOCATION).build(&registry).unwrap();
    let b = RedisCache::builder()
        .server(LOCATION)
        .password("secret")
        .pool_options(PoolOptions {
            max_connections: 50,
            ..PoolOptions::default()
        })
        .build(&registry)
        .unwrap();

    assert!(a.pool().ptr_eq(b.pool()));
    // The first cache decided the pool size.
    assert_eq!(b.pool().max_connections(), PoolOptions::default().max_connections);
}

#[test]
fn test_distinct_identities_get_distinct_pools() {
    let registry = PoolRegistry::new();
    let base = RedisCache::builder().server(LOCATION).db(1).build(&registry).unwrap();
    let others = [
        RedisCache::builder().server(LOCATION).db(2).build(&registry).unwrap(),
        RedisCache::builder().server("127.0.0.1:6380").db(1).build(&registry).unwrap(),
        RedisCache::builder()
            .server(LOCATION)
            .db(1)
            .parser_class(ParserClass::Resp3)
            .build(&registry)
            .unwrap(),
        RedisCache::builder()
            .server("/tmp/redis.sock")
            .db(1)
            .build(&registry)
            .unwrap(),
    ];

    for other in &others {
        assert!(!base.pool().ptr_eq(other.pool()), "{}", other.pool().identity());
    }
    assert_eq!(registry.len(), 5);
}

#[test]
fn test_registries_are_independent() {
    let first = PoolRegistry::new();
    let second = PoolRegistry::new();
    let a = RedisCache::builder().server(LOCATION).build(&first).unwrap();
    let b = RedisCache::builder().server(LOCATION).build(&second).unwrap();

    assert!(!a.pool().ptr_eq(b.pool()));
}

#[test]
fn test_unknown_pool_class() {
    let registry = PoolRegistry::new();
    let err = RedisCache::builder()
        .server(LOCATION)
        .pool_class("missing.Pool")
        .build(&registry)
        .unwrap_err();

    assert!(err.is_config());
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnknownPoolClass(ref name)) if name == "missing.Pool"
    ));
    assert!(registry.is_empty());
}

#[test]
fn test_registered_pool_class() {
    let registry = PoolRegistry::new();
    registry.register_pool_class("single", single_connection_pool);
    assert!(registry.has_pool_class("single"));
    assert_eq!(registry.class_names(), ["blocking", "eager", "single"]);

    let cache = RedisCache::builder()
        .server(LOCATION)
        .pool_class("single")
        .build(&registry)
        .unwrap();
    assert_eq!(cache.pool().max_connections(), 1);
    assert_eq!(cache.pool().identity().pool_class, "single");

    // Same server and db, different class: separate pool.
    let blocking = RedisCache::builder().server(LOCATION).build(&registry).unwrap();
    assert!(!cache.pool().ptr_eq(blocking.pool()));
}

#[test]
fn test_eager_pool_fails_for_unreachable_server() {
    let registry = PoolRegistry::new();
    let err = RedisCache::builder()
        .server("127.0.0.1:1")
        .pool_class("eager")
        .pool_options(PoolOptions {
            connection_timeout: Duration::from_millis(200),
            ..PoolOptions::default()
        })
        .build(&registry)
        .unwrap_err();

    assert!(matches!(err, Error::Pool(_)), "unexpected error: {err:?}");
    assert!(registry.is_empty());
}

#[test]
fn test_invalid_pool_options_rejected() {
    let registry = PoolRegistry::new();
    let err = RedisCache::builder()
        .server(LOCATION)
        .pool_options(PoolOptions {
            max_connections: 0,
            ..PoolOptions::default()
        })
        .build(&registry)
        .unwrap_err();

    assert!(matches!(err, Error::Config(ConfigError::InvalidPoolKwargs(_))));
    assert!(registry.is_empty());
}

#[test]
fn test_shared_from_many_threads() {
    let registry = PoolRegistry::new();
    let caches: Vec<RedisCache> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    RedisCache::builder()
                        .server(LOCATION)
                        .db(5)
                        .build(&registry)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(registry.len(), 1);
    assert!(caches.windows(2).all(|w| w[0].pool().ptr_eq(w[1].pool())));
}

#[test]
fn test_slow_pool_build_does_not_block_registry() {
    let registry = PoolRegistry::new();
    std::thread::scope(|scope| {
        let slow = scope.spawn(|| {
            RedisCache::builder()
                .server("127.0.0.1:1")
                .pool_class("eager")
                .pool_options(PoolOptions {
                    connection_timeout: Duration::from_secs(2),
                    ..PoolOptions::default()
                })
                .build(&registry)
        });
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        assert_eq!(registry.len(), 0);
        let fast = RedisCache::builder().server(LOCATION).build(&registry).unwrap();
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "registry was blocked for {:?}",
            started.elapsed()
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(fast.pool().identity().pool_class, "blocking");

        assert!(slow.join().unwrap().is_err());
    });
    assert_eq!(registry.len(), 1);
}
