//! Lock-free counters for a [`Cache`](super::Cache), sampled independently
//! of the map/LRU lock held during `Get`/`Set`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for a cache instance.
///
/// All fields are cumulative since the cache was created; `size` is the
/// one gauge (it tracks live entry count rather than an event count).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: u64,
}

impl Snapshot {
    /// `hits / (hits + misses)`, or `0.0` when there have been no lookups
    /// at all (avoids a `0/0` NaN).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Atomic counters backing a cache's metrics.
///
/// Kept in a struct separate from the map/LRU lock so recording a hit or
/// miss never contends with the lock guarding the data itself; readers pay
/// for an independent set of relaxed atomic loads instead of fighting for
/// the `RwLock`.
///
/// Every `record_*` method is a no-op when the cache was built with
/// `enable_metrics: false`, which is the default.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    size: AtomicU64,
    enabled: bool,
}

impl AtomicMetrics {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_set(&self) {
        if self.enabled {
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_delete(&self) {
        if self.enabled {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_eviction(&self) {
        if self.enabled {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_expiration(&self) {
        if self.enabled {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn inc_size(&self) {
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn dec_size(&self) {
        self.size.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        })
        .ok();
    }

    #[inline]
    pub(crate) fn set_size(&self, value: u64) {
        self.size.store(value, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_are_noops() {
        let m = AtomicMetrics::new(false);
        m.record_hit();
        m.record_miss();
        m.record_set();
        assert_eq!(m.snapshot(), Snapshot::default());
    }

    #[test]
    fn enabled_metrics_count() {
        let m = AtomicMetrics::new(true);
        m.record_hit();
        m.record_hit();
        m.record_miss();
        m.inc_size();
        let snap = m.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.size, 1);
        assert!((snap.hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn hit_rate_with_no_lookups_is_zero() {
        let snap = Snapshot::default();
        assert_eq!(snap.hit_rate(), 0.0);
    }

    #[test]
    fn size_never_underflows() {
        let m = AtomicMetrics::new(true);
        m.dec_size();
        assert_eq!(m.snapshot().size, 0);
    }
}
