//! Expiry semantics for writes.
//!
//! | Requested | Resolved |
//! |-----------|----------|
//! | [`Timeout::Default`] | the cache's configured default |
//! | [`Timeout::Never`] | [`Expiry::Persist`] |
//! | `Timeout::Seconds(n)`, `n > 0` | [`Expiry::After`]`(n)` |
//! | `Timeout::Seconds(n)`, `n <= 0` | [`Expiry::Discard`] |
//!
//! A discarded write stores nothing.

use std::time::Duration;

/// Expiry requested by a caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    /// Use the cache's default timeout.
    #[default]
    Default,
    /// Keep the entry until it is deleted or evicted.
    Never,
    /// Expire after the given number of seconds. Zero or negative values
    /// mean the entry is not written at all.
    Seconds(i64),
}

impl Timeout {
    /// Converts the optional seconds form used by settings (`None` = never).
    pub fn from_seconds(seconds: Option<i64>) -> Self {
        seconds.map_or(Timeout::Never, Timeout::Seconds)
    }

    /// Resolves against the cache default. A `Default` default is treated
    /// as `Never`.
    pub fn resolve(self, default: Timeout) -> Expiry {
        let effective = match self {
            Timeout::Default => default,
            other => other,
        };
        match effective {
            Timeout::Default | Timeout::Never => Expiry::Persist,
            Timeout::Seconds(n) if n > 0 => Expiry::After(n.unsigned_abs()),
            Timeout::Seconds(_) => Expiry::Discard,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::Seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Timeout::Never, Timeout::from)
    }
}

/// Concrete action taken by a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// Write without a TTL.
    Persist,
    /// Write with a TTL of this many seconds.
    After(u64),
    /// Do not write.
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let default = Timeout::Seconds(300);
        assert_eq!(Timeout::Default.resolve(default), Expiry::After(300));
        assert_eq!(Timeout::Never.resolve(default), Expiry::Persist);
        assert_eq!(Timeout::Seconds(5).resolve(default), Expiry::After(5));
        assert_eq!(Timeout::Seconds(0).resolve(default), Expiry::Discard);
        assert_eq!(Timeout::Seconds(-1).resolve(default), Expiry::Discard);
        assert_eq!(Timeout::Default.resolve(Timeout::Never), Expiry::Persist);
        assert_eq!(Timeout::Default.resolve(Timeout::Default), Expiry::Persist);
    }

    #[test]
    fn test_from_settings_seconds() {
        assert_eq!(Timeout::from_seconds(None), Timeout::Never);
        assert_eq!(Timeout::from_seconds(Some(60)), Timeout::Seconds(60));
    }
}
