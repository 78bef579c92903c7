//! Expiration policies.
//!
//! An [`ExpirationPolicy`] computes an entry's absolute expiry time (millis
//! since the Unix epoch, `0` = never expires) at three points in its life:
//! creation, read access, and update. The engine consults the policy while
//! building a mutation, so the computed expiry is installed in the same
//! per-key critical section as the value itself.

use std::time::Duration;

/// Expiry time value meaning "never expires".
pub const NO_EXPIRY: i64 = 0;

/// Computes absolute expiry times for cache entries.
///
/// `on_access` and `on_update` return `None` to leave the current expiry
/// unchanged. A returned time at or before the current wall clock means the
/// entry is immediately expired.
///
/// Used as `Arc<dyn ExpirationPolicy>`.
pub trait ExpirationPolicy: Send + Sync {
    /// Expiry for a newly created entry.
    fn on_create(&self, now: i64) -> i64;

    /// Expiry adjustment when an entry is read. `None` keeps `current`.
    fn on_access(&self, now: i64, current: i64) -> Option<i64> {
        let _ = (now, current);
        None
    }

    /// Expiry adjustment when an entry's value is replaced. `None` keeps
    /// `current`.
    fn on_update(&self, now: i64, current: i64) -> Option<i64> {
        let _ = (now, current);
        None
    }
}

/// TTL durations are always reasonable millisecond spans, not near u64::MAX.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn ttl_millis(ttl: Duration) -> i64 {
    ttl.as_millis() as i64
}

/// Entries never expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EternalExpiry;

impl ExpirationPolicy for EternalExpiry {
    fn on_create(&self, _now: i64) -> i64 {
        NO_EXPIRY
    }
}

/// Fixed TTL measured from creation. Reads and updates do not extend it.
#[derive(Debug, Clone, Copy)]
pub struct CreatedExpiry {
    ttl: Duration,
}

impl CreatedExpiry {
    /// Policy expiring entries `ttl` after creation.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl ExpirationPolicy for CreatedExpiry {
    fn on_create(&self, now: i64) -> i64 {
        now + ttl_millis(self.ttl)
    }
}

/// TTL refreshed on every read and every update.
#[derive(Debug, Clone, Copy)]
pub struct TouchedExpiry {
    ttl: Duration,
}

impl TouchedExpiry {
    /// Policy expiring entries `ttl` after the most recent touch.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl ExpirationPolicy for TouchedExpiry {
    fn on_create(&self, now: i64) -> i64 {
        now + ttl_millis(self.ttl)
    }

    fn on_access(&self, now: i64, _current: i64) -> Option<i64> {
        Some(now + ttl_millis(self.ttl))
    }

    fn on_update(&self, now: i64, _current: i64) -> Option<i64> {
        Some(now + ttl_millis(self.ttl))
    }
}

/// TTL refreshed on updates only; reads do not extend it.
#[derive(Debug, Clone, Copy)]
pub struct ModifiedExpiry {
    ttl: Duration,
}

impl ModifiedExpiry {
    /// Policy expiring entries `ttl` after the most recent write.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl ExpirationPolicy for ModifiedExpiry {
    fn on_create(&self, now: i64) -> i64 {
        now + ttl_millis(self.ttl)
    }

    fn on_update(&self, now: i64, _current: i64) -> Option<i64> {
        Some(now + ttl_millis(self.ttl))
    }
}
