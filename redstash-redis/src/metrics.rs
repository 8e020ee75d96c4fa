//! Cache metrics.
//!
//! Enable the `metrics` feature to record these through the [`metrics`]
//! facade; without it every call compiles to nothing.
//!
//! ## Naming Pattern
//!
//! - `redstash_cache_get_total{result="hit"|"miss"}` - key lookups
//! - `redstash_cache_command_total{operation}` - cache operations
//! - `redstash_cache_command_errors_total{operation}` - failed operations
//! - `redstash_cache_command_duration_seconds{operation}` - operation latency
//!
//! [`metrics`]: https://docs.rs/metrics

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

/// Zero-cost timer for metrics collection.
///
/// When the `metrics` feature is enabled, this captures the start time.
/// When disabled, this is a zero-sized struct with no overhead.
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    /// Create a new timer, capturing the current instant if metrics enabled.
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer creation.
    ///
    /// Returns actual elapsed time when metrics enabled, Duration::ZERO otherwise.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for key lookups, labelled by result.
    pub static ref CACHE_GET_TOTAL: &'static str = {
        metrics::describe_counter!(
            "redstash_cache_get_total",
            "Total number of key lookups, labelled hit or miss."
        );
        "redstash_cache_get_total"
    };

    /// Metric name for cache operations.
    pub static ref CACHE_COMMAND_TOTAL: &'static str = {
        metrics::describe_counter!(
            "redstash_cache_command_total",
            "Total number of cache operations."
        );
        "redstash_cache_command_total"
    };

    /// Metric name for failed cache operations.
    pub static ref CACHE_COMMAND_ERRORS: &'static str = {
        metrics::describe_counter!(
            "redstash_cache_command_errors_total",
            "Total number of failed cache operations."
        );
        "redstash_cache_command_errors_total"
    };

    /// Metric name for operation latency.
    pub static ref CACHE_COMMAND_DURATION: &'static str = {
        metrics::describe_histogram!(
            "redstash_cache_command_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of cache operations in seconds."
        );
        "redstash_cache_command_duration_seconds"
    };
}

/// Records the outcome of one operation.
#[inline]
pub fn record_command<T, E>(operation: &'static str, timer: &Timer, result: &Result<T, E>) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!(*CACHE_COMMAND_TOTAL, "operation" => operation).increment(1);
        metrics::histogram!(*CACHE_COMMAND_DURATION, "operation" => operation)
            .record(timer.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::counter!(*CACHE_COMMAND_ERRORS, "operation" => operation).increment(1);
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (operation, timer, result);
    }
}

/// Records `hits` found and `misses` absent keys.
#[inline]
pub fn record_lookups(hits: u64, misses: u64) {
    #[cfg(feature = "metrics")]
    {
        if hits > 0 {
            metrics::counter!(*CACHE_GET_TOTAL, "result" => "hit").increment(hits);
        }
        if misses > 0 {
            metrics::counter!(*CACHE_GET_TOTAL, "result" => "miss").increment(misses);
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = (hits, misses);
    }
}
