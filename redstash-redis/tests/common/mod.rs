//! Shared helpers for tests that need a live Redis server.
//!
//! Set `REDIS_LOCATION` (`host:port`) to use an existing server. Otherwise a
//! `redis:7-alpine` container is started once per test binary, which needs
//! Docker. The live tests are `#[ignore]`d; run them with
//! `cargo test -- --ignored`.

#![allow(dead_code)]

use std::sync::OnceLock;

use redstash_redis::{PoolRegistry, RedisCache, RedisCacheBuilder};

/// Database used by the live tests; every test clears it first.
pub const TEST_DB: i64 = 1;

static SERVER: OnceLock<String> = OnceLock::new();

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Location of the test server. Panics if none can be found or started.
pub fn server() -> &'static str {
    SERVER.get_or_init(|| {
        init_tracing();
        std::env::var("REDIS_LOCATION").unwrap_or_else(|_| start_container())
    })
}

fn start_container() -> String {
    use testcontainers::{ImageExt, runners::SyncRunner};
    use testcontainers_modules::redis::{REDIS_PORT, Redis};

    let container = Redis::default()
        .with_tag("7-alpine")
        .start()
        .expect("Failed to start Redis container; set REDIS_LOCATION to use an existing server");
    let host = container.get_host().expect("Redis container host");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .expect("Redis container port");

    // Keep the container running for the rest of the test binary.
    Box::leak(Box::new(container));

    format!("{host}:{port}")
}

/// A builder pointed at the test server and database.
pub fn builder() -> RedisCacheBuilder {
    RedisCache::builder().server(server()).db(TEST_DB)
}

/// A cache on a fresh registry with an empty database.
pub fn cache() -> RedisCache {
    let cache = builder().build(&PoolRegistry::new()).expect("build cache");
    cache.clear().expect("clear test database");
    cache
}
