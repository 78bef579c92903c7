//! Cache configuration and builder.
//!
//! [`CacheConfig`] bundles capacity, eviction, expiration, dispatch, and
//! collaborator settings. Constructed through [`CacheConfig::builder`];
//! validation happens once at [`CacheConfigBuilder::build`], so a
//! constructed config is always usable.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, CacheResult};
use crate::expiry::{EternalExpiry, ExpirationPolicy};
use crate::external::{CacheLoader, CacheWriter};

/// Victim selection policy for capacity eviction.
///
/// All policies are approximate: victims are chosen from a bounded random
/// sample, not from a globally ordered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Fewest recorded read hits first.
    #[default]
    Lfu,
    /// Oldest last-access time first.
    Lru,
    /// Oldest creation time first.
    Fifo,
}

/// Settings for the listener dispatch subsystem.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Capacity of each per-listener event queue.
    pub queue_capacity: usize,
    /// How long an enqueue may block on a full queue before the event is
    /// dropped and counted.
    pub enqueue_timeout: Duration,
    /// How long close waits for workers to drain their queues before
    /// aborting them.
    pub drain_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(500),
            drain_grace: Duration::from_secs(5),
        }
    }
}

/// Complete configuration for one cache instance.
pub struct CacheConfig<K, V> {
    /// Label used in log output to correlate caches.
    pub label: String,
    /// Maximum number of entries before eviction triggers. 0 = unlimited.
    pub capacity: u64,
    /// Victim selection policy for capacity eviction.
    pub eviction_policy: EvictionPolicy,
    /// Number of random candidates examined per eviction round.
    pub eviction_sample_size: usize,
    /// Interval between evictor cycles.
    pub evictor_interval: Duration,
    /// Number of random entries examined per expiry sweep round.
    pub sweep_sample_size: usize,
    /// Expired share of a sweep sample above which the sweep immediately
    /// draws another sample, in `(0.0, 1.0]`.
    pub sweep_threshold: f64,
    /// Expiration policy consulted on create, access, and update.
    pub expiration: Arc<dyn ExpirationPolicy>,
    /// Read-through loader, if configured.
    pub loader: Option<Arc<dyn CacheLoader<K, V>>>,
    /// Write-through writer, if configured.
    pub writer: Option<Arc<dyn CacheWriter<K, V>>>,
    /// Listener dispatch settings.
    pub dispatch: DispatchConfig,
}

impl<K, V> CacheConfig<K, V> {
    /// Starts a builder with defaults: unlimited capacity, LFU eviction over
    /// 16 candidates, 250ms evictor interval, 20-entry sweep samples at a
    /// 0.25 threshold, eternal expiration, no loader, no writer.
    #[must_use]
    pub fn builder() -> CacheConfigBuilder<K, V> {
        CacheConfigBuilder {
            label: String::new(),
            capacity: 0,
            eviction_policy: EvictionPolicy::default(),
            eviction_sample_size: 16,
            evictor_interval: Duration::from_millis(250),
            sweep_sample_size: 20,
            sweep_threshold: 0.25,
            expiration: Arc::new(EternalExpiry),
            loader: None,
            writer: None,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl<K, V> Clone for CacheConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            capacity: self.capacity,
            eviction_policy: self.eviction_policy,
            eviction_sample_size: self.eviction_sample_size,
            evictor_interval: self.evictor_interval,
            sweep_sample_size: self.sweep_sample_size,
            sweep_threshold: self.sweep_threshold,
            expiration: Arc::clone(&self.expiration),
            loader: self.loader.clone(),
            writer: self.writer.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for CacheConfig<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("eviction_policy", &self.eviction_policy)
            .field("eviction_sample_size", &self.eviction_sample_size)
            .field("evictor_interval", &self.evictor_interval)
            .field("sweep_sample_size", &self.sweep_sample_size)
            .field("sweep_threshold", &self.sweep_threshold)
            .field("loader", &self.loader.is_some())
            .field("writer", &self.writer.is_some())
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`CacheConfig`].
pub struct CacheConfigBuilder<K, V> {
    label: String,
    capacity: u64,
    eviction_policy: EvictionPolicy,
    eviction_sample_size: usize,
    evictor_interval: Duration,
    sweep_sample_size: usize,
    sweep_threshold: f64,
    expiration: Arc<dyn ExpirationPolicy>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    dispatch: DispatchConfig,
}

impl<K, V> CacheConfigBuilder<K, V> {
    /// Sets the label used in log output.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the maximum entry count. 0 = unlimited.
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the victim selection policy.
    #[must_use]
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Sets the number of candidates sampled per eviction round.
    #[must_use]
    pub fn eviction_sample_size(mut self, size: usize) -> Self {
        self.eviction_sample_size = size;
        self
    }

    /// Sets the interval between evictor cycles.
    #[must_use]
    pub fn evictor_interval(mut self, interval: Duration) -> Self {
        self.evictor_interval = interval;
        self
    }

    /// Sets the number of entries sampled per expiry sweep round.
    #[must_use]
    pub fn sweep_sample_size(mut self, size: usize) -> Self {
        self.sweep_sample_size = size;
        self
    }

    /// Sets the expired-share threshold that keeps a sweep looping.
    #[must_use]
    pub fn sweep_threshold(mut self, threshold: f64) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    /// Sets the expiration policy.
    #[must_use]
    pub fn expiration(mut self, policy: Arc<dyn ExpirationPolicy>) -> Self {
        self.expiration = policy;
        self
    }

    /// Configures a read-through loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Configures a write-through writer.
    #[must_use]
    pub fn writer(mut self, writer: Arc<dyn CacheWriter<K, V>>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Overrides the listener dispatch settings.
    #[must_use]
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Validates and produces the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidArgument`] for zero sample sizes, a
    /// sweep threshold outside `(0.0, 1.0]`, or a zero queue capacity.
    pub fn build(self) -> CacheResult<CacheConfig<K, V>> {
        if self.eviction_sample_size == 0 {
            return Err(CacheError::invalid_argument(
                "eviction sample size must be positive",
            ));
        }
        if self.sweep_sample_size == 0 {
            return Err(CacheError::invalid_argument(
                "sweep sample size must be positive",
            ));
        }
        if !(self.sweep_threshold > 0.0 && self.sweep_threshold <= 1.0) {
            return Err(CacheError::invalid_argument(
                "sweep threshold must be in (0.0, 1.0]",
            ));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(CacheError::invalid_argument(
                "dispatch queue capacity must be positive",
            ));
        }
        Ok(CacheConfig {
            label: self.label,
            capacity: self.capacity,
            eviction_policy: self.eviction_policy,
            eviction_sample_size: self.eviction_sample_size,
            evictor_interval: self.evictor_interval,
            sweep_sample_size: self.sweep_sample_size,
            sweep_threshold: self.sweep_threshold,
            expiration: self.expiration,
            loader: self.loader,
            writer: self.writer,
            dispatch: self.dispatch,
        })
    }
}
