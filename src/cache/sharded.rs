//! A fixed, power-of-two set of independent [`Cache`] shards, picked by
//! key hash, so concurrent `Get`/`Set` calls for different keys don't
//! contend on the same lock.

use super::{metrics::Snapshot, Cache, CacheResult, CancelToken, Expiration};
use crate::limits::{CacheConfig, ShardedCacheConfig};
use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash, Hasher},
    sync::Arc,
};

/// Consistent-hash-sharded cache.
///
/// The shard count is rounded up to the next power of two so shard
/// selection is a mask instead of a modulo. Each shard gets an equal
/// share of `cache.max_size` (floor, minimum `1`); hit/miss/set/etc.
/// counters and size are reported as sums across shards, and hit rate is
/// recomputed from those aggregated hits/misses rather than averaged
/// per-shard.
///
/// The key-hashing seed is chosen once, at construction, from
/// [`RandomState`]'s process-level randomness, and is never exposed; it
/// only needs to be stable for the lifetime of one `ShardedCache`
/// instance so the same key always lands on the same shard.
pub struct ShardedCache<K, V> {
    shards: Box<[Arc<Cache<K, V>>]>,
    hasher: RandomState,
    shard_count: usize,
}

impl<K, V> ShardedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: ShardedCacheConfig) -> Self {
        let shard_count = config.shard_count.next_power_of_two().max(1);
        let per_shard_max = (config.cache.max_size / shard_count).max(1);

        let shards = (0..shard_count)
            .map(|_| {
                Cache::new(CacheConfig {
                    max_size: per_shard_max,
                    ..config.cache.clone()
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
            shard_count,
        }
    }

    /// Index of the shard that owns `key`. Exposed for tests that want to
    /// assert hashing stability; not meaningful across process restarts.
    pub fn shard_of(&self, key: &K) -> usize {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.shard_count - 1)
    }

    #[inline]
    fn shard(&self, key: &K) -> &Cache<K, V> {
        &self.shards[self.shard_of(key)]
    }

    pub fn get(&self, key: &K, cancel: Option<&CancelToken>) -> CacheResult<V> {
        self.shard(key).get(key, cancel)
    }

    pub fn set(
        &self,
        key: K,
        value: V,
        expiration: Expiration,
        cancel: Option<&CancelToken>,
    ) -> CacheResult<()> {
        let shard = self.shard_of(&key);
        self.shards[shard].set(key, value, expiration, cancel)
    }

    pub fn delete(&self, key: &K, cancel: Option<&CancelToken>) -> CacheResult<()> {
        self.shard(key).delete(key, cancel)
    }

    pub fn exists(&self, key: &K, cancel: Option<&CancelToken>) -> CacheResult<bool> {
        self.shard(key).exists(key, cancel)
    }

    /// Clears every shard. Not atomic across shards as a whole.
    pub fn clear(&self, cancel: Option<&CancelToken>) -> CacheResult<()> {
        for shard in self.shards.iter() {
            shard.clear(cancel)?;
        }
        Ok(())
    }

    pub fn close(&self) {
        for shard in self.shards.iter() {
            shard.close();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Aggregated counters across every shard; `hit_rate` is recomputed
    /// from the summed hits/misses, not averaged per-shard.
    pub fn metrics(&self) -> Snapshot {
        self.shards.iter().map(|s| s.metrics()).fold(
            Snapshot::default(),
            |acc, s| Snapshot {
                hits: acc.hits + s.hits,
                misses: acc.misses + s.misses,
                sets: acc.sets + s.sets,
                deletes: acc.deletes + s.deletes,
                evictions: acc.evictions + s.evictions,
                expirations: acc.expirations + s.expirations,
                size: acc.size + s.size,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::EvictionMode;

    fn config(total_max: usize, shard_count: usize) -> ShardedCacheConfig {
        ShardedCacheConfig {
            cache: CacheConfig {
                max_size: total_max,
                default_ttl: None,
                eviction_mode: EvictionMode::Lru,
                cleanup_interval: None,
                enable_metrics: true,
                _priv: (),
            },
            shard_count,
            _priv: (),
        }
    }

    #[test]
    fn shard_count_rounds_up_to_power_of_two() {
        let cache: ShardedCache<i32, i32> = ShardedCache::new(config(100, 5));
        assert_eq!(cache.shard_count(), 8);
    }

    #[test]
    fn per_shard_capacity_is_floor_divided() {
        let cache: ShardedCache<i32, i32> = ShardedCache::new(config(100, 4));
        // four shards, 25 each; filling 25 distinct keys into one shard
        // via forced collisions isn't observable here, but aggregate
        // capacity should roughly match the configured total.
        for i in 0..100 {
            let _ = cache.set(i, i, Expiration::Never, None);
        }
        assert!(cache.len() <= 100);
    }

    #[test]
    fn shard_of_is_stable_across_calls() {
        let cache: ShardedCache<i32, i32> = ShardedCache::new(config(32, 8));
        let first = cache.shard_of(&42);
        for _ in 0..10 {
            assert_eq!(cache.shard_of(&42), first);
        }
    }

    #[test]
    fn get_set_roundtrip_through_sharding() {
        let cache: ShardedCache<String, String> = ShardedCache::new(config(32, 8));
        cache
            .set("k".into(), "v".into(), Expiration::Never, None)
            .unwrap();
        assert_eq!(cache.get(&"k".into(), None).unwrap(), "v");
    }

    #[test]
    fn aggregated_metrics_sum_across_shards() {
        let cache: ShardedCache<i32, i32> = ShardedCache::new(config(32, 8));
        for i in 0..8 {
            cache.set(i, i, Expiration::Never, None).unwrap();
        }
        for i in 0..8 {
            cache.get(&i, None).unwrap();
        }
        let snap = cache.metrics();
        assert_eq!(snap.sets, 8);
        assert_eq!(snap.hits, 8);
        assert_eq!(snap.size, 8);
    }
}
