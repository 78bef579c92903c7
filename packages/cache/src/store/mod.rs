//! Concurrent entry store with the compose-and-classify primitive.
//!
//! [`EntryStore`] maps keys to [`CacheEntry`] values inside a sharded
//! concurrent map. All mutations funnel through
//! [`compose_and_classify`](EntryStore::compose_and_classify): a mutator
//! observes the current entry and returns a [`MutationDecision`], which is
//! applied and classified into a [`ChangeStatus`] inside the same per-key
//! exclusive section. Between the observation and the installation no other
//! mutator can interleave on that key.
//!
//! Expiry is folded into the same step: a resident entry whose expiry time
//! has passed is presented to the mutator as absent, retired as part of the
//! critical section, and surfaced through
//! [`ComposeOutcome::expired_value`] so the caller can emit the expiry
//! notification.

pub mod entry;

use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use gridcache_core::ExpirationPolicy;
use rand::Rng;

pub use entry::{CacheEntry, EntryMetadata};

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
///
/// Millisecond timestamps fit comfortably in i64 until the year 292 million.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Classified outcome of one compose-and-classify step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// The key was absent and is now present.
    Created,
    /// The key was present and its value was replaced.
    Changed,
    /// No content mutation took place.
    Unchanged,
    /// An expected-value check failed against the resident value.
    CompareFailed,
    /// The key was present and is now absent.
    Removed,
}

/// Decision returned by a mutator after observing the current entry.
///
/// `Insert` is valid when the entry is absent, `Replace`, `Remove`, `Touch`,
/// and `CompareFailed` when it is present; `Keep` is always valid.
#[derive(Debug)]
pub enum MutationDecision<V> {
    /// Leave the slot as observed.
    Keep,
    /// Record a read access on the resident entry, optionally installing a
    /// refreshed expiry. Not a content change.
    Touch {
        /// Refreshed absolute expiry, or `None` to keep the current one.
        expiry_time: Option<i64>,
    },
    /// The resident value did not match the expected value.
    CompareFailed,
    /// Install a value into an empty slot.
    Insert {
        /// The value to install.
        value: V,
        /// Absolute expiry for the new entry.
        expiry_time: i64,
    },
    /// Replace the resident value.
    Replace {
        /// The replacement value.
        value: V,
        /// Absolute expiry for the replacement.
        expiry_time: i64,
    },
    /// Remove the resident entry.
    Remove,
}

/// Result of one compose-and-classify step.
///
/// `expired_value` is set when the observed resident entry had already
/// expired; it was retired in the same critical section and the mutator saw
/// the key as absent.
#[derive(Debug, Clone)]
pub struct ComposeOutcome<V> {
    /// How the mutation was classified.
    pub status: ChangeStatus,
    /// The live value observed before the mutation, if any.
    pub old_value: Option<V>,
    /// The value installed by the mutation, if any.
    pub new_value: Option<V>,
    /// The value of an expired resident entry retired by this step.
    pub expired_value: Option<V>,
}

impl<V> ComposeOutcome<V> {
    fn new(status: ChangeStatus) -> Self {
        Self {
            status,
            old_value: None,
            new_value: None,
            expired_value: None,
        }
    }
}

/// Concurrent key-to-entry mapping with per-key atomic compose-and-classify.
///
/// Backed by a sharded [`DashMap`]; the shard entry lock is the per-key
/// exclusive section. Reads not going through a mutator (`peek`, sampling,
/// snapshots) are lock-free with respect to other shards.
pub struct EntryStore<K, V> {
    entries: DashMap<K, CacheEntry<V>, ahash::RandomState>,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Runs `mutator` against the current entry for `key` under the per-key
    /// exclusive section, applies its decision, and classifies the result.
    ///
    /// An expired resident entry is presented to the mutator as absent and
    /// retired within the same section, whatever the decision.
    pub fn compose_and_classify<F>(&self, key: &K, now: i64, mutator: F) -> ComposeOutcome<V>
    where
        F: FnOnce(Option<&CacheEntry<V>>) -> MutationDecision<V>,
    {
        match self.entries.entry(key.clone()) {
            Slot::Occupied(mut slot) => {
                if slot.get().metadata.is_expired(now) {
                    let stale = slot.get().value.clone();
                    match mutator(None) {
                        MutationDecision::Insert { value, expiry_time }
                        | MutationDecision::Replace { value, expiry_time } => {
                            slot.insert(CacheEntry::new(value.clone(), now, expiry_time));
                            ComposeOutcome {
                                status: ChangeStatus::Created,
                                old_value: None,
                                new_value: Some(value),
                                expired_value: Some(stale),
                            }
                        }
                        MutationDecision::Keep
                        | MutationDecision::Touch { .. }
                        | MutationDecision::CompareFailed
                        | MutationDecision::Remove => {
                            // Observation retires the stale entry.
                            slot.remove();
                            ComposeOutcome {
                                status: ChangeStatus::Unchanged,
                                old_value: None,
                                new_value: None,
                                expired_value: Some(stale),
                            }
                        }
                    }
                } else {
                    let decision = mutator(Some(slot.get()));
                    match decision {
                        MutationDecision::Keep => {
                            let mut outcome = ComposeOutcome::new(ChangeStatus::Unchanged);
                            outcome.old_value = Some(slot.get().value.clone());
                            outcome
                        }
                        MutationDecision::Touch { expiry_time } => {
                            let value = slot.get().value.clone();
                            slot.get_mut().metadata.on_access(now, expiry_time);
                            let mut outcome = ComposeOutcome::new(ChangeStatus::Unchanged);
                            outcome.old_value = Some(value);
                            outcome
                        }
                        MutationDecision::CompareFailed => {
                            let mut outcome = ComposeOutcome::new(ChangeStatus::CompareFailed);
                            outcome.old_value = Some(slot.get().value.clone());
                            outcome
                        }
                        MutationDecision::Insert { value, expiry_time }
                        | MutationDecision::Replace { value, expiry_time } => {
                            let entry = slot.get_mut();
                            let old = std::mem::replace(&mut entry.value, value.clone());
                            entry.metadata.on_update(expiry_time);
                            ComposeOutcome {
                                status: ChangeStatus::Changed,
                                old_value: Some(old),
                                new_value: Some(value),
                                expired_value: None,
                            }
                        }
                        MutationDecision::Remove => {
                            let removed = slot.remove();
                            let mut outcome = ComposeOutcome::new(ChangeStatus::Removed);
                            outcome.old_value = Some(removed.value);
                            outcome
                        }
                    }
                }
            }
            Slot::Vacant(slot) => match mutator(None) {
                MutationDecision::Insert { value, expiry_time }
                | MutationDecision::Replace { value, expiry_time } => {
                    slot.insert(CacheEntry::new(value.clone(), now, expiry_time));
                    let mut outcome = ComposeOutcome::new(ChangeStatus::Created);
                    outcome.new_value = Some(value);
                    outcome
                }
                MutationDecision::Keep
                | MutationDecision::Touch { .. }
                | MutationDecision::CompareFailed
                | MutationDecision::Remove => ComposeOutcome::new(ChangeStatus::Unchanged),
            },
        }
    }

    // --- Derived operations ---

    /// Reads `key`, recording the access on a live entry.
    pub fn get(&self, key: &K, now: i64, policy: &dyn ExpirationPolicy) -> ComposeOutcome<V> {
        self.compose_and_classify(key, now, |current| match current {
            Some(entry) => MutationDecision::Touch {
                expiry_time: policy.on_access(now, entry.metadata.expiry_time),
            },
            None => MutationDecision::Keep,
        })
    }

    /// Installs `value` for `key`, replacing any live value.
    pub fn put(
        &self,
        key: &K,
        value: V,
        now: i64,
        policy: &dyn ExpirationPolicy,
    ) -> ComposeOutcome<V> {
        self.compose_and_classify(key, now, |current| match current {
            Some(entry) => MutationDecision::Replace {
                value,
                expiry_time: policy
                    .on_update(now, entry.metadata.expiry_time)
                    .unwrap_or(entry.metadata.expiry_time),
            },
            None => MutationDecision::Insert {
                value,
                expiry_time: policy.on_create(now),
            },
        })
    }

    /// Installs `value` only if `key` has no live entry.
    pub fn put_if_absent(
        &self,
        key: &K,
        value: V,
        now: i64,
        policy: &dyn ExpirationPolicy,
    ) -> ComposeOutcome<V> {
        self.compose_and_classify(key, now, |current| match current {
            Some(_) => MutationDecision::Keep,
            None => MutationDecision::Insert {
                value,
                expiry_time: policy.on_create(now),
            },
        })
    }

    /// Replaces the live value for `key`; absent keys stay absent.
    pub fn replace(
        &self,
        key: &K,
        value: V,
        now: i64,
        policy: &dyn ExpirationPolicy,
    ) -> ComposeOutcome<V> {
        self.compose_and_classify(key, now, |current| match current {
            Some(entry) => MutationDecision::Replace {
                value,
                expiry_time: policy
                    .on_update(now, entry.metadata.expiry_time)
                    .unwrap_or(entry.metadata.expiry_time),
            },
            None => MutationDecision::Keep,
        })
    }

    /// Replaces the live value for `key` only if it equals `expected`.
    pub fn replace_if_equals(
        &self,
        key: &K,
        expected: &V,
        value: V,
        now: i64,
        policy: &dyn ExpirationPolicy,
    ) -> ComposeOutcome<V>
    where
        V: PartialEq,
    {
        self.compose_and_classify(key, now, |current| match current {
            Some(entry) if entry.value == *expected => MutationDecision::Replace {
                value,
                expiry_time: policy
                    .on_update(now, entry.metadata.expiry_time)
                    .unwrap_or(entry.metadata.expiry_time),
            },
            Some(_) => MutationDecision::CompareFailed,
            None => MutationDecision::Keep,
        })
    }

    /// Removes the live entry for `key`.
    pub fn remove(&self, key: &K, now: i64) -> ComposeOutcome<V> {
        self.compose_and_classify(key, now, |current| match current {
            Some(_) => MutationDecision::Remove,
            None => MutationDecision::Keep,
        })
    }

    /// Removes the live entry for `key` only if its value equals `expected`.
    pub fn remove_if_equals(&self, key: &K, expected: &V, now: i64) -> ComposeOutcome<V>
    where
        V: PartialEq,
    {
        self.compose_and_classify(key, now, |current| match current {
            Some(entry) if entry.value == *expected => MutationDecision::Remove,
            Some(_) => MutationDecision::CompareFailed,
            None => MutationDecision::Keep,
        })
    }

    // --- Non-mutating reads and maintenance ---

    /// Reads `key` without recording an access or retiring expired entries.
    pub fn peek(&self, key: &K, now: i64) -> Option<V> {
        self.entries.get(key).and_then(|entry| {
            if entry.metadata.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        })
    }

    /// Removes the entry for `key` only if it has expired, returning its
    /// value for the expiry notification.
    pub fn expire_if_stale(&self, key: &K, now: i64) -> Option<V> {
        match self.entries.entry(key.clone()) {
            Slot::Occupied(slot) if slot.get().metadata.is_expired(now) => {
                Some(slot.remove().value)
            }
            _ => None,
        }
    }

    /// Number of resident entries, including expired ones not yet retired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry without notifications. Returns the prior count.
    pub fn clear(&self) -> usize {
        let previous = self.entries.len();
        self.entries.clear();
        previous
    }

    /// Point-in-time snapshot of all live entries.
    ///
    /// Mutation-tolerant: concurrent modifications neither fail the
    /// snapshot nor are guaranteed to appear in it.
    #[must_use]
    pub fn snapshot(&self, now: i64) -> Vec<(K, V)> {
        self.entries
            .iter()
            .filter(|entry| !entry.value().metadata.is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    /// Returns up to `sample_count` random entries' keys and metadata for
    /// eviction and sweep candidate selection.
    #[must_use]
    pub fn sample_metadata(&self, sample_count: usize) -> Vec<(K, EntryMetadata)> {
        if sample_count == 0 {
            return Vec::new();
        }

        let mut rng = rand::rng();
        let mut reservoir: Vec<(K, EntryMetadata)> = Vec::with_capacity(sample_count);

        for (i, entry) in self.entries.iter().enumerate() {
            let pair = (entry.key().clone(), entry.value().metadata.clone());
            if i < sample_count {
                reservoir.push(pair);
            } else {
                // Replace an existing sample with probability sample_count / (i + 1)
                let j = rng.random_range(0..=i);
                if j < sample_count {
                    reservoir[j] = pair;
                }
            }
        }

        reservoir
    }
}

impl<K, V> Default for EntryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
