//! The public cache handle.
//!
//! [`Cache`] is a cheaply cloneable handle over the shared engine: the
//! action pipeline, the listener dispatch subsystem, the lifecycle
//! controller, and the background evictor. Every operation except
//! [`is_closed`](Cache::is_closed) fails with
//! [`CacheError::Closed`](gridcache_core::CacheError::Closed) once close
//! has begun.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use gridcache_core::{CacheConfig, CacheResult, CacheStats, ListenerConfig};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dispatch::Dispatcher;
use crate::eviction::{self, EvictorConfig};
use crate::lifecycle::LifecycleController;
use crate::listener::{ListenerHandle, ListenerRegistry};
use crate::pipeline::{ActionKind, ActionPipeline};
use crate::stats::StatisticsCalculator;

struct CacheInner<K, V> {
    pipeline: Arc<ActionPipeline<K, V>>,
    dispatcher: Arc<Dispatcher<K, V>>,
    lifecycle: LifecycleController,
    evictor: Mutex<Option<JoinHandle<()>>>,
    drain_grace: Duration,
    label: String,
}

/// Concurrent key-value cache with bounded capacity, per-entry expiration,
/// read-through/write-through collaborators, and an observable event
/// stream.
///
/// Handles are cheap to clone and share one engine. Must be constructed
/// inside a Tokio runtime: the evictor and listener dispatch workers are
/// spawned on it.
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache from `config` and starts its background evictor.
    #[must_use]
    pub fn new(config: CacheConfig<K, V>) -> Self {
        let stats = Arc::new(StatisticsCalculator::new());
        let registry = Arc::new(ListenerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            &config.dispatch,
            config.label.clone(),
        ));
        let pipeline = Arc::new(ActionPipeline::new(
            Arc::clone(&dispatcher),
            stats,
            Arc::clone(&config.expiration),
            config.loader.clone(),
            config.writer.clone(),
            config.label.clone(),
        ));
        let lifecycle = LifecycleController::new();

        let evictor = tokio::spawn(eviction::run(
            Arc::downgrade(&pipeline),
            EvictorConfig {
                capacity: config.capacity,
                policy: config.eviction_policy,
                sample_size: config.eviction_sample_size,
                interval: config.evictor_interval,
                sweep_sample_size: config.sweep_sample_size,
                sweep_threshold: config.sweep_threshold,
                label: config.label.clone(),
            },
            lifecycle.shutdown_receiver(),
        ));

        Self {
            inner: Arc::new(CacheInner {
                pipeline,
                dispatcher,
                lifecycle,
                evictor: Mutex::new(Some(evictor)),
                drain_grace: config.dispatch.drain_grace,
                label: config.label,
            }),
        }
    }

    // --- Reads ---

    /// Returns the value for `key`, loading through the configured loader
    /// on a miss.
    pub async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.get(key).await
    }

    /// Returns the present mappings for `keys`, loading misses through the
    /// configured loader.
    pub async fn get_all(&self, keys: &[K]) -> CacheResult<Vec<(K, V)>> {
        self.inner.lifecycle.ensure_open()?;
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.inner.pipeline.get(key).await? {
                found.push((key.clone(), value));
            }
        }
        Ok(found)
    }

    /// Returns whether `key` maps to a live entry, without recording an
    /// access or consulting the loader.
    pub fn contains_key(&self, key: &K) -> CacheResult<bool> {
        self.inner.lifecycle.ensure_open()?;
        Ok(self.inner.pipeline.contains_key(key))
    }

    /// Weakly consistent snapshot of the live entries.
    ///
    /// Concurrent mutations neither fail the snapshot nor are guaranteed to
    /// appear in it.
    pub fn entries(&self) -> CacheResult<Vec<(K, V)>> {
        self.inner.lifecycle.ensure_open()?;
        Ok(self.inner.pipeline.snapshot())
    }

    /// Number of resident entries, including expired entries the evictor
    /// has not yet retired.
    pub fn len(&self) -> CacheResult<usize> {
        self.inner.lifecycle.ensure_open()?;
        Ok(self.inner.pipeline.len())
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    // --- Writes ---

    /// Installs `value` for `key`.
    pub async fn put(&self, key: &K, value: V) -> CacheResult<()> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.put(key, value).await.map(|_| ())
    }

    /// Installs `value` for `key`, returning the prior value.
    pub async fn get_and_put(&self, key: &K, value: V) -> CacheResult<Option<V>> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.put(key, value).await
    }

    /// Installs every mapping in `entries`.
    pub async fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> CacheResult<()> {
        self.inner.lifecycle.ensure_open()?;
        for (key, value) in entries {
            self.inner.pipeline.put(&key, value).await?;
        }
        Ok(())
    }

    /// Installs `value` only if `key` has no live entry. Returns `true` on
    /// installation.
    pub async fn put_if_absent(&self, key: &K, value: V) -> CacheResult<bool> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.put_if_absent(key, value).await
    }

    /// Replaces the live value for `key`. Returns `true` if a value was
    /// replaced.
    pub async fn replace(&self, key: &K, value: V) -> CacheResult<bool> {
        self.inner.lifecycle.ensure_open()?;
        self.inner
            .pipeline
            .replace(key, value)
            .await
            .map(|old| old.is_some())
    }

    /// Replaces the live value for `key`, returning the prior value.
    pub async fn get_and_replace(&self, key: &K, value: V) -> CacheResult<Option<V>> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.replace(key, value).await
    }

    /// Replaces the live value for `key` only if it equals `expected`.
    pub async fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> CacheResult<bool>
    where
        V: PartialEq,
    {
        self.inner.lifecycle.ensure_open()?;
        self.inner
            .pipeline
            .replace_if_equals(key, expected, value)
            .await
    }

    /// Removes the live entry for `key`. Returns `true` if one was removed.
    pub async fn remove(&self, key: &K) -> CacheResult<bool> {
        self.inner.lifecycle.ensure_open()?;
        self.inner
            .pipeline
            .remove(key, ActionKind::Remove)
            .await
            .map(|old| old.is_some())
    }

    /// Removes the live entry for `key`, returning its value.
    pub async fn get_and_remove(&self, key: &K) -> CacheResult<Option<V>> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.remove(key, ActionKind::GetAndRemove).await
    }

    /// Removes the live entry for `key` only if its value equals
    /// `expected`.
    pub async fn remove_if_equals(&self, key: &K, expected: &V) -> CacheResult<bool>
    where
        V: PartialEq,
    {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.remove_if_equals(key, expected).await
    }

    /// Removes the given keys through the full pipeline: write-through,
    /// removal events, and removal counts apply per key.
    pub async fn remove_all_keys(&self, keys: &[K]) -> CacheResult<()> {
        self.inner.lifecycle.ensure_open()?;
        for key in keys {
            self.inner.pipeline.remove(key, ActionKind::Remove).await?;
        }
        Ok(())
    }

    /// Removes every entry through the full pipeline.
    pub async fn remove_all(&self) -> CacheResult<()> {
        self.inner.lifecycle.ensure_open()?;
        let keys: Vec<K> = self
            .inner
            .pipeline
            .snapshot()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        self.remove_all_keys(&keys).await
    }

    /// Drops every entry without events or write-through.
    pub fn clear(&self) -> CacheResult<()> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.pipeline.clear();
        Ok(())
    }

    // --- Listeners ---

    /// Registers an entry listener and starts its dispatch worker.
    ///
    /// # Errors
    ///
    /// Rejects a listener instance that is already registered; the first
    /// registration stays active.
    pub fn register_listener(&self, config: ListenerConfig<K, V>) -> CacheResult<ListenerHandle> {
        self.inner.lifecycle.ensure_open()?;
        self.inner.dispatcher.register(config)
    }

    /// Deregisters a listener. Its worker drains buffered events and exits.
    ///
    /// Returns `false` if the handle does not match a current registration.
    pub fn deregister_listener(&self, handle: &ListenerHandle) -> CacheResult<bool> {
        self.inner.lifecycle.ensure_open()?;
        Ok(self.inner.dispatcher.deregister(handle))
    }

    // --- Statistics and lifecycle ---

    /// Point-in-time snapshot of the monotonic counter bundle.
    #[must_use]
    pub fn statistics(&self) -> CacheStats {
        self.inner.pipeline.stats().snapshot()
    }

    /// Whether close has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Closes the cache: stops the evictor, drains listener queues up to
    /// the configured grace period, and drops all registrations.
    ///
    /// Idempotent; concurrent callers after the first return immediately
    /// while the first performs the drain.
    pub async fn close(&self) {
        if !self.inner.lifecycle.begin_close() {
            return;
        }

        if let Some(evictor) = self.inner.evictor.lock().take() {
            let abort = evictor.abort_handle();
            if tokio::time::timeout(self.inner.drain_grace, evictor)
                .await
                .is_err()
            {
                abort.abort();
                warn!(
                    cache = %self.inner.label,
                    "evictor did not stop within the drain grace period; aborted"
                );
            }
        }

        self.inner.dispatcher.shutdown().await;
        self.inner.lifecycle.set_closed();
    }
}
