//! Background eviction and expiry sweeping.
//!
//! One dedicated worker per cache runs on an interval. Each cycle first
//! brings the store back under capacity by removing victims picked from a
//! random sample, then sweeps a bounded sample for expired entries,
//! repeating the sweep while the expired share stays above the configured
//! threshold. Both paths notify through the regular pipeline with forced
//! asynchronous delivery, so the worker never blocks on user code.
//!
//! The worker holds only a weak reference to the engine: dropping the last
//! cache handle lets the next cycle observe the engine gone and exit, and
//! close stops the worker through the lifecycle signal.

use std::hash::Hash;
use std::sync::Weak;
use std::time::Duration;

use gridcache_core::EvictionPolicy;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::pipeline::ActionPipeline;
use crate::store::{now_millis, EntryMetadata};

/// Settings the evictor worker runs with, derived from the cache config.
#[derive(Debug, Clone)]
pub(crate) struct EvictorConfig {
    pub capacity: u64,
    pub policy: EvictionPolicy,
    pub sample_size: usize,
    pub interval: Duration,
    pub sweep_sample_size: usize,
    pub sweep_threshold: f64,
    pub label: String,
}

/// Orders a candidate sample by the victim policy and returns up to `count`
/// keys to evict.
fn select_victims<K>(
    mut sample: Vec<(K, EntryMetadata)>,
    policy: EvictionPolicy,
    count: usize,
) -> Vec<K> {
    match policy {
        // Ties on hits fall back to the older access, so a cold entry that
        // was also idle longest goes first.
        EvictionPolicy::Lfu => {
            sample.sort_by_key(|(_, metadata)| (metadata.hits, metadata.last_access_time));
        }
        EvictionPolicy::Lru => sample.sort_by_key(|(_, metadata)| metadata.last_access_time),
        EvictionPolicy::Fifo => sample.sort_by_key(|(_, metadata)| metadata.creation_time),
    }
    sample.truncate(count);
    sample.into_iter().map(|(key, _)| key).collect()
}

/// The dedicated evictor loop.
pub(crate) async fn run<K, V>(
    pipeline: Weak<ActionPipeline<K, V>>,
    config: EvictorConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(pipeline) = pipeline.upgrade() else {
                    break;
                };
                evict_over_capacity(&pipeline, &config).await;
                sweep_expired(&pipeline, &config).await;
            }
        }
    }
    debug!(cache = %config.label, "evictor stopped");
}

/// Removes sampled victims until the store is back under capacity or the
/// cycle stops making progress.
async fn evict_over_capacity<K, V>(pipeline: &ActionPipeline<K, V>, config: &EvictorConfig)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    if config.capacity == 0 {
        return;
    }

    let mut evicted = 0_usize;
    loop {
        let size = pipeline.len() as u64;
        if size <= config.capacity {
            break;
        }
        // Sample sizes and store sizes stay far below usize::MAX.
        #[allow(clippy::cast_possible_truncation)]
        let excess = (size - config.capacity) as usize;

        let sample = pipeline.sample_metadata(config.sample_size);
        if sample.is_empty() {
            break;
        }
        let victims = select_victims(sample, config.policy, excess);
        let retired = pipeline.evict_batch(victims).await;
        if retired == 0 {
            break;
        }
        evicted += retired;
    }

    if evicted > 0 {
        debug!(cache = %config.label, evicted, "capacity eviction cycle complete");
    }
}

/// Retires expired entries from random samples, looping while the expired
/// share of a sample exceeds the threshold.
async fn sweep_expired<K, V>(pipeline: &ActionPipeline<K, V>, config: &EvictorConfig)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut removed = 0_usize;
    loop {
        let sample = pipeline.sample_metadata(config.sweep_sample_size);
        if sample.is_empty() {
            break;
        }
        let sample_len = sample.len();
        let now = now_millis();
        let stale: Vec<K> = sample
            .into_iter()
            .filter(|(_, metadata)| metadata.is_expired(now))
            .map(|(key, _)| key)
            .collect();
        if stale.is_empty() {
            break;
        }

        let retired = pipeline.expire_batch(stale).await;
        removed += retired;

        trace!(
            cache = %config.label,
            retired,
            sampled = sample_len,
            "sweep round complete"
        );

        // Precision is irrelevant for the threshold comparison.
        #[allow(clippy::cast_precision_loss)]
        if (retired as f64) < (sample_len as f64 * config.sweep_threshold) {
            break;
        }
    }

    if removed > 0 {
        debug!(cache = %config.label, removed, "expiry sweep complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcache_core::NO_EXPIRY;

    fn metadata(hits: u32, last_access: i64, created: i64) -> EntryMetadata {
        EntryMetadata {
            version: 1,
            creation_time: created,
            last_access_time: last_access,
            expiry_time: NO_EXPIRY,
            hits,
        }
    }

    #[test]
    fn lfu_prefers_fewest_hits() {
        let sample = vec![
            ("hot", metadata(10, 100, 0)),
            ("cold", metadata(0, 100, 0)),
            ("warm", metadata(5, 100, 0)),
        ];
        let victims = select_victims(sample, EvictionPolicy::Lfu, 2);
        assert_eq!(victims, vec!["cold", "warm"]);
    }

    #[test]
    fn lfu_ties_break_on_older_access() {
        let sample = vec![
            ("recent", metadata(1, 200, 0)),
            ("idle", metadata(1, 50, 0)),
        ];
        let victims = select_victims(sample, EvictionPolicy::Lfu, 1);
        assert_eq!(victims, vec!["idle"]);
    }

    #[test]
    fn lru_prefers_oldest_access() {
        let sample = vec![
            ("fresh", metadata(0, 300, 0)),
            ("stale", metadata(0, 100, 0)),
        ];
        let victims = select_victims(sample, EvictionPolicy::Lru, 1);
        assert_eq!(victims, vec!["stale"]);
    }

    #[test]
    fn fifo_prefers_oldest_creation() {
        let sample = vec![
            ("young", metadata(0, 0, 500)),
            ("old", metadata(0, 0, 100)),
        ];
        let victims = select_victims(sample, EvictionPolicy::Fifo, 1);
        assert_eq!(victims, vec!["old"]);
    }

    #[test]
    fn victim_count_is_bounded_by_sample() {
        let sample = vec![("only", metadata(0, 0, 0))];
        let victims = select_victims(sample, EvictionPolicy::Lfu, 10);
        assert_eq!(victims.len(), 1);
    }
}
