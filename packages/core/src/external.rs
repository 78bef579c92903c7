//! Read-through and write-through collaborator traits.
//!
//! [`CacheLoader`] populates the cache on misses; [`CacheWriter`] propagates
//! committed mutations to an external system of record. Both are user
//! supplied, may block on I/O, and are always invoked outside the per-key
//! critical section. Failures are opaque `anyhow` errors; the engine wraps
//! them into the typed cache error taxonomy.

use async_trait::async_trait;

/// Loads values from an external source on cache misses.
///
/// Used as `Arc<dyn CacheLoader<K, V>>`.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    /// Load the value for `key`, or `None` if the source has no mapping.
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>>;
}

/// Propagates committed mutations to an external system of record.
///
/// `write` is called after a value is installed, `delete` after a key is
/// removed. The in-memory mutation is never rolled back on failure.
///
/// Used as `Arc<dyn CacheWriter<K, V>>`.
#[async_trait]
pub trait CacheWriter<K, V>: Send + Sync {
    /// Persist the mapping `key -> value`.
    async fn write(&self, key: &K, value: &V) -> anyhow::Result<()>;

    /// Remove `key` from the backing store.
    async fn delete(&self, key: &K) -> anyhow::Result<()>;
}

/// No-op [`CacheWriter`] that accepts every mutation without side effects.
///
/// The default writer when no external persistence is configured; also
/// convenient in tests and benchmarks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWriter;

#[async_trait]
impl<K, V> CacheWriter<K, V> for NullWriter
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn write(&self, _key: &K, _value: &V) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &K) -> anyhow::Result<()> {
        Ok(())
    }
}
