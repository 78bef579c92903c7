//! Entry types for the store layer.
//!
//! Defines [`CacheEntry`] and [`EntryMetadata`], the unit of storage held in
//! one [`EntryStore`](super::EntryStore) slot.

use gridcache_core::NO_EXPIRY;

/// Metadata tracked for every entry in the store.
///
/// Tracks the version counter, timestamps, and access statistics used by
/// expiration and eviction. All times are wall-clock millis since the Unix
/// epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Entry version, incremented on every content change.
    pub version: u64,
    /// When this entry was created.
    pub creation_time: i64,
    /// Time of the last read access. Used by LRU eviction.
    pub last_access_time: i64,
    /// Absolute expiry time. 0 = never expires.
    pub expiry_time: i64,
    /// Number of read accesses. Used by LFU eviction.
    pub hits: u32,
}

impl EntryMetadata {
    /// Creates metadata for a freshly installed entry.
    ///
    /// Version starts at 1, hits at 0, and both timestamps at `now`.
    #[must_use]
    pub fn new(now: i64, expiry_time: i64) -> Self {
        Self {
            version: 1,
            creation_time: now,
            last_access_time: now,
            expiry_time,
            hits: 0,
        }
    }

    /// Records a read access: bumps `hits`, refreshes `last_access_time`,
    /// and installs a refreshed expiry when the policy produced one.
    pub fn on_access(&mut self, now: i64, new_expiry: Option<i64>) {
        self.hits = self.hits.saturating_add(1);
        self.last_access_time = now;
        if let Some(expiry) = new_expiry {
            self.expiry_time = expiry;
        }
    }

    /// Records a content change: bumps `version` and installs the expiry
    /// computed for the replacement value.
    pub fn on_update(&mut self, expiry_time: i64) {
        self.version = self.version.saturating_add(1);
        self.expiry_time = expiry_time;
    }

    /// Returns `true` if the entry's expiry time has passed.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry_time != NO_EXPIRY && self.expiry_time <= now
    }
}

/// A complete entry: value plus store-internal metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// Store-internal metadata, never exposed through the public API.
    pub metadata: EntryMetadata,
}

impl<V> CacheEntry<V> {
    /// Creates an entry holding `value` with fresh metadata.
    #[must_use]
    pub fn new(value: V, now: i64, expiry_time: i64) -> Self {
        Self {
            value,
            metadata: EntryMetadata::new(now, expiry_time),
        }
    }
}
