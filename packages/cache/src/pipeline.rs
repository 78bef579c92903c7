//! Action pipeline: the staged execution behind every public operation.
//!
//! Each operation runs four stages in a fixed order:
//!
//! 1. **Compose** -- a mutator derived from the operation and the
//!    expiration policy runs through the store's compose-and-classify step.
//! 2. **Write-through** -- installed values are written and removals deleted
//!    through the configured writer. `Unchanged` and `CompareFailed`
//!    outcomes never reach the writer, and a writer failure fails the
//!    action without rolling back the in-memory mutation.
//! 3. **Notify** -- the event matching the outcome is dispatched, preceded
//!    by the expiry event when the step retired a stale entry.
//! 4. **Statistics** -- one decision table keyed on action kind and outcome
//!    increments the counter bundle; installation is counted by exactly one
//!    row so a put can never be double-counted.
//!
//! Eviction and sweep removals run the same stages with force-async
//! notification and log-only writer failure handling.

use std::hash::Hash;
use std::sync::Arc;

use gridcache_core::{
    CacheError, CacheLoader, CacheResult, CacheWriter, EntryEvent, EventType, ExpirationPolicy,
};
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::stats::StatisticsCalculator;
use crate::store::{now_millis, ChangeStatus, ComposeOutcome, EntryMetadata, EntryStore};

/// The public operation an outcome is being finalized for.
///
/// Distinguishes operations whose statistics rows differ; operations with
/// identical rows share a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionKind {
    Get,
    Put,
    PutIfAbsent,
    Replace,
    Remove,
    GetAndRemove,
}

/// Applies the statistics decision table for one finalized action.
///
/// `present` reports whether the compose step observed a live entry; only
/// the `Get` row distinguishes on it.
fn record_statistics(
    kind: ActionKind,
    status: ChangeStatus,
    present: bool,
    stats: &StatisticsCalculator,
) {
    use ActionKind as A;
    use ChangeStatus as S;

    match (kind, status) {
        (A::Put, S::Created) => stats.put(),
        (A::Put, S::Changed) => {
            stats.hit();
            stats.put();
        }
        (A::PutIfAbsent, S::Created) => {
            stats.miss();
            stats.put();
        }
        (A::PutIfAbsent, S::Unchanged) => stats.hit(),
        (A::Replace, S::Changed) => {
            stats.hit();
            stats.put();
        }
        // The replace row never counts a put for an installation; the put
        // count belongs to whichever row actually installs the entry.
        (A::Replace, S::Created | S::Unchanged) => stats.miss(),
        (A::Replace, S::CompareFailed) => stats.hit(),
        (A::Get, S::Unchanged) => {
            if present {
                stats.hit();
            } else {
                stats.miss();
            }
        }
        (A::Remove, S::Removed) => stats.removal(),
        (A::GetAndRemove, S::Removed) => {
            stats.hit();
            stats.removal();
        }
        (A::Remove | A::GetAndRemove, S::Unchanged) => stats.miss(),
        (A::Remove | A::GetAndRemove, S::CompareFailed) => stats.hit(),
        _ => {}
    }
}

/// Shared engine executing the four pipeline stages.
///
/// Owned behind an `Arc` by the cache handle; the evictor worker holds a
/// `Weak` reference so a dropped cache can wind down.
pub struct ActionPipeline<K, V> {
    store: EntryStore<K, V>,
    dispatcher: Arc<Dispatcher<K, V>>,
    stats: Arc<StatisticsCalculator>,
    expiration: Arc<dyn ExpirationPolicy>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    label: String,
}

impl<K, V> ActionPipeline<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher<K, V>>,
        stats: Arc<StatisticsCalculator>,
        expiration: Arc<dyn ExpirationPolicy>,
        loader: Option<Arc<dyn CacheLoader<K, V>>>,
        writer: Option<Arc<dyn CacheWriter<K, V>>>,
        label: String,
    ) -> Self {
        Self {
            store: EntryStore::new(),
            dispatcher,
            stats,
            expiration,
            loader,
            writer,
            label,
        }
    }

    // --- Caller-facing operations ---

    /// Reads `key`, loading through the configured loader on a miss.
    pub(crate) async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        let outcome = self.store.get(key, now_millis(), self.expiration.as_ref());
        self.finalize(ActionKind::Get, key, &outcome).await?;
        if outcome.old_value.is_some() {
            return Ok(outcome.old_value);
        }

        let Some(loader) = &self.loader else {
            return Ok(None);
        };
        let Some(value) = loader.load(key).await.map_err(CacheError::Loader)? else {
            return Ok(None);
        };

        // Install the loaded value unless a racing writer beat us to the
        // slot; loading is not an observable cache modification, so no
        // event fires and no put is counted.
        let install = self
            .store
            .put_if_absent(key, value, now_millis(), self.expiration.as_ref());
        if install.expired_value.is_some() {
            self.stats.expiry();
            self.notify_expired(key, install.expired_value.clone(), false)
                .await;
        }
        match install.status {
            ChangeStatus::Created => Ok(install.new_value),
            _ => Ok(install.old_value),
        }
    }

    /// Installs `value`, returning the prior value.
    pub(crate) async fn put(&self, key: &K, value: V) -> CacheResult<Option<V>> {
        let outcome = self
            .store
            .put(key, value, now_millis(), self.expiration.as_ref());
        self.finalize(ActionKind::Put, key, &outcome).await?;
        Ok(outcome.old_value)
    }

    /// Installs `value` if `key` is absent. Returns `true` on installation.
    pub(crate) async fn put_if_absent(&self, key: &K, value: V) -> CacheResult<bool> {
        let outcome = self
            .store
            .put_if_absent(key, value, now_millis(), self.expiration.as_ref());
        self.finalize(ActionKind::PutIfAbsent, key, &outcome).await?;
        Ok(outcome.status == ChangeStatus::Created)
    }

    /// Replaces the live value for `key`, returning the prior value.
    pub(crate) async fn replace(&self, key: &K, value: V) -> CacheResult<Option<V>> {
        let outcome = self
            .store
            .replace(key, value, now_millis(), self.expiration.as_ref());
        self.finalize(ActionKind::Replace, key, &outcome).await?;
        match outcome.status {
            ChangeStatus::Changed => Ok(outcome.old_value),
            _ => Ok(None),
        }
    }

    /// Replaces the live value only if it equals `expected`.
    pub(crate) async fn replace_if_equals(
        &self,
        key: &K,
        expected: &V,
        value: V,
    ) -> CacheResult<bool>
    where
        V: PartialEq,
    {
        let outcome = self.store.replace_if_equals(
            key,
            expected,
            value,
            now_millis(),
            self.expiration.as_ref(),
        );
        self.finalize(ActionKind::Replace, key, &outcome).await?;
        Ok(outcome.status == ChangeStatus::Changed)
    }

    /// Removes `key`, returning the removed value when `kind` requests it.
    pub(crate) async fn remove(&self, key: &K, kind: ActionKind) -> CacheResult<Option<V>> {
        let outcome = self.store.remove(key, now_millis());
        self.finalize(kind, key, &outcome).await?;
        match outcome.status {
            ChangeStatus::Removed => Ok(outcome.old_value),
            _ => Ok(None),
        }
    }

    /// Removes `key` only if its value equals `expected`.
    pub(crate) async fn remove_if_equals(&self, key: &K, expected: &V) -> CacheResult<bool>
    where
        V: PartialEq,
    {
        let outcome = self.store.remove_if_equals(key, expected, now_millis());
        self.finalize(ActionKind::Remove, key, &outcome).await?;
        Ok(outcome.status == ChangeStatus::Removed)
    }

    /// Non-mutating presence check: no access recording, no statistics.
    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.store.peek(key, now_millis()).is_some()
    }

    /// Drops every entry without events, write-through, or statistics.
    pub(crate) fn clear(&self) -> usize {
        self.store.clear()
    }

    /// Weakly consistent snapshot of live entries.
    pub(crate) fn snapshot(&self) -> Vec<(K, V)> {
        self.store.snapshot(now_millis())
    }

    /// Resident entry count, including expired entries not yet retired.
    pub(crate) fn len(&self) -> usize {
        self.store.len()
    }

    /// Counter bundle shared with the dispatcher and evictor.
    pub(crate) fn stats(&self) -> &StatisticsCalculator {
        &self.stats
    }

    // --- Evictor-facing operations ---

    /// Keys and metadata of up to `sample_count` random entries.
    pub(crate) fn sample_metadata(&self, sample_count: usize) -> Vec<(K, EntryMetadata)> {
        self.store.sample_metadata(sample_count)
    }

    /// Removes eviction victims, notifying force-async so user code never
    /// blocks the evictor. Returns how many entries left the store.
    ///
    /// A victim that turns out to have expired is retired with an expiry
    /// notification instead of a removal.
    pub(crate) async fn evict_batch(&self, victims: Vec<K>) -> usize {
        let mut removed_events = Vec::new();
        let mut expired_events = Vec::new();
        let mut retired = 0;

        for key in victims {
            let outcome = self.store.remove(&key, now_millis());
            match outcome.status {
                ChangeStatus::Removed => {
                    if let Some(writer) = &self.writer {
                        if let Err(error) = writer.delete(&key).await {
                            warn!(
                                cache = %self.label,
                                error = %error,
                                "write-through delete failed during eviction"
                            );
                        }
                    }
                    self.stats.eviction();
                    retired += 1;
                    if self.dispatcher.wants(EventType::Removed) {
                        removed_events.push(EntryEvent {
                            event_type: EventType::Removed,
                            key,
                            value: None,
                            old_value: outcome.old_value,
                        });
                    }
                }
                _ => {
                    if let Some(stale) = outcome.expired_value {
                        self.stats.expiry();
                        retired += 1;
                        if self.dispatcher.wants(EventType::Expired) {
                            expired_events.push(EntryEvent {
                                event_type: EventType::Expired,
                                key,
                                value: None,
                                old_value: Some(stale),
                            });
                        }
                    }
                }
            }
        }

        self.dispatcher.dispatch_batch(expired_events, true).await;
        self.dispatcher.dispatch_batch(removed_events, true).await;
        retired
    }

    /// Retires entries whose expiry time has passed, notifying force-async.
    /// Returns how many entries were retired.
    pub(crate) async fn expire_batch(&self, keys: Vec<K>) -> usize {
        let mut events = Vec::new();
        let mut retired = 0;

        for key in keys {
            if let Some(stale) = self.store.expire_if_stale(&key, now_millis()) {
                self.stats.expiry();
                retired += 1;
                if self.dispatcher.wants(EventType::Expired) {
                    events.push(EntryEvent {
                        event_type: EventType::Expired,
                        key,
                        value: None,
                        old_value: Some(stale),
                    });
                }
            }
        }

        self.dispatcher.dispatch_batch(events, true).await;
        retired
    }

    // --- Stages 2-4 ---

    /// Runs write-through, notification, and statistics for one outcome.
    async fn finalize(
        &self,
        kind: ActionKind,
        key: &K,
        outcome: &ComposeOutcome<V>,
    ) -> CacheResult<()> {
        if let Some(writer) = &self.writer {
            match (outcome.status, &outcome.new_value) {
                (ChangeStatus::Created | ChangeStatus::Changed, Some(value)) => {
                    writer
                        .write(key, value)
                        .await
                        .map_err(CacheError::Writer)?;
                }
                (ChangeStatus::Removed, _) => {
                    writer.delete(key).await.map_err(CacheError::Writer)?;
                }
                _ => {}
            }
        }

        self.notify(key, outcome, false).await;

        record_statistics(kind, outcome.status, outcome.old_value.is_some(), &self.stats);
        if outcome.expired_value.is_some() {
            self.stats.expiry();
        }
        Ok(())
    }

    /// Emits the expiry event (if the step retired a stale entry) followed
    /// by the event matching the outcome.
    async fn notify(&self, key: &K, outcome: &ComposeOutcome<V>, force_async: bool) {
        self.notify_expired(key, outcome.expired_value.clone(), force_async)
            .await;

        let event = match outcome.status {
            ChangeStatus::Created if self.dispatcher.wants(EventType::Created) => {
                Some(EntryEvent {
                    event_type: EventType::Created,
                    key: key.clone(),
                    value: outcome.new_value.clone(),
                    old_value: None,
                })
            }
            ChangeStatus::Changed if self.dispatcher.wants(EventType::Updated) => {
                Some(EntryEvent {
                    event_type: EventType::Updated,
                    key: key.clone(),
                    value: outcome.new_value.clone(),
                    old_value: outcome.old_value.clone(),
                })
            }
            ChangeStatus::Removed if self.dispatcher.wants(EventType::Removed) => {
                Some(EntryEvent {
                    event_type: EventType::Removed,
                    key: key.clone(),
                    value: None,
                    old_value: outcome.old_value.clone(),
                })
            }
            _ => None,
        };
        if let Some(event) = event {
            self.dispatcher.dispatch(event, force_async).await;
        }
    }

    async fn notify_expired(&self, key: &K, stale: Option<V>, force_async: bool) {
        let Some(stale) = stale else { return };
        if !self.dispatcher.wants(EventType::Expired) {
            return;
        }
        self.dispatcher
            .dispatch(
                EntryEvent {
                    event_type: EventType::Expired,
                    key: key.clone(),
                    value: None,
                    old_value: Some(stale),
                },
                force_async,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerRegistry;
    use gridcache_core::{DispatchConfig, EternalExpiry};

    fn pipeline() -> ActionPipeline<String, u64> {
        let registry = Arc::new(ListenerRegistry::new());
        let stats = Arc::new(StatisticsCalculator::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Arc::clone(&stats),
            &DispatchConfig::default(),
            "test".to_string(),
        ));
        ActionPipeline::new(
            dispatcher,
            stats,
            Arc::new(EternalExpiry),
            None,
            None,
            "test".to_string(),
        )
    }

    #[tokio::test]
    async fn put_counts_exactly_one_put_per_installation() {
        let pipeline = pipeline();
        pipeline.put(&"a".to_string(), 1).await.expect("create");
        pipeline.put(&"a".to_string(), 2).await.expect("replace");

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.puts, 2);
        assert_eq!(stats.hits, 1, "overwrite counts one hit");
    }

    #[tokio::test]
    async fn put_if_absent_rows() {
        let pipeline = pipeline();
        assert!(pipeline.put_if_absent(&"a".to_string(), 1).await.expect("first"));
        assert!(!pipeline.put_if_absent(&"a".to_string(), 2).await.expect("second"));

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn replace_rows() {
        let pipeline = pipeline();

        // Absent: miss, nothing installed.
        assert_eq!(pipeline.replace(&"a".to_string(), 1).await.expect("absent"), None);
        let stats = pipeline.stats().snapshot();
        assert_eq!((stats.misses, stats.puts), (1, 0));

        // Present: hit + put.
        pipeline.put(&"a".to_string(), 1).await.expect("seed");
        assert_eq!(
            pipeline.replace(&"a".to_string(), 2).await.expect("present"),
            Some(1)
        );
        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.puts, 2);
        assert_eq!(stats.hits, 1);

        // Expected-value mismatch: hit, value untouched.
        assert!(!pipeline
            .replace_if_equals(&"a".to_string(), &9, 3)
            .await
            .expect("mismatch"));
        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.puts, 2);
        assert_eq!(pipeline.get(&"a".to_string()).await.expect("get"), Some(2));
    }

    #[tokio::test]
    async fn get_rows() {
        let pipeline = pipeline();
        assert_eq!(pipeline.get(&"a".to_string()).await.expect("miss"), None);
        pipeline.put(&"a".to_string(), 1).await.expect("seed");
        assert_eq!(pipeline.get(&"a".to_string()).await.expect("hit"), Some(1));

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn remove_rows() {
        let pipeline = pipeline();
        pipeline.put(&"a".to_string(), 1).await.expect("seed");

        assert!(!pipeline
            .remove_if_equals(&"a".to_string(), &9)
            .await
            .expect("mismatch"));
        assert_eq!(
            pipeline
                .remove(&"a".to_string(), ActionKind::Remove)
                .await
                .expect("removed"),
            Some(1)
        );
        assert_eq!(
            pipeline
                .remove(&"a".to_string(), ActionKind::Remove)
                .await
                .expect("absent"),
            None
        );

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.removals, 1);
        assert_eq!(stats.hits, 1, "mismatch counts a hit");
        assert_eq!(stats.misses, 1, "remove of absent key counts a miss");
    }

    #[tokio::test]
    async fn get_and_remove_counts_hit_and_removal() {
        let pipeline = pipeline();
        pipeline.put(&"a".to_string(), 1).await.expect("seed");
        assert_eq!(
            pipeline
                .remove(&"a".to_string(), ActionKind::GetAndRemove)
                .await
                .expect("removed"),
            Some(1)
        );
        let stats = pipeline.stats().snapshot();
        assert_eq!((stats.hits, stats.removals), (1, 1));
    }
}
