//! In-memory, TTL-and-LRU cache engine.
//!
//! [`Cache`] is the single-map building block: a `parking_lot::RwLock`
//! guarding a hash map plus an intrusive LRU list, with eviction and expiry
//! policy driven by [`CacheConfig`](crate::limits::CacheConfig). [`sharded`]
//! stacks several `Cache` instances behind consistent hashing to spread lock
//! contention across a striped set of shards.
//!
//! Built around a `parking_lot::RwLock` + periodic sweeper task, with a real
//! doubly-linked LRU list rather than "evict the single oldest entry."

pub mod metrics;
pub mod sharded;

use crate::{errors::HandlerError, limits::{CacheConfig, EvictionMode}};
use metrics::AtomicMetrics;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::{
    hash::Hash,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;

pub use sharded::ShardedCache;

/// Result type returned by every [`Cache`] operation.
pub type CacheResult<T> = Result<T, HandlerError>;

/// A flag an in-flight `Get`/`Set`/`Delete` can be asked to observe before
/// it takes the cache lock.
///
/// Cancellation is checked exactly once, before any lock is acquired; once
/// an operation has started doing real work it always runs to completion.
/// Construct a pair with [`CancelToken::new`]: the [`CancelHandle`] half
/// signals cancellation, the [`CancelToken`] half is what callers pass in
/// to cache operations.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

/// The signaling half of a [`CancelToken`] pair.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, not-yet-canceled token/handle pair.
    pub fn new() -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        (Self(Arc::clone(&flag)), CancelHandle(flag))
    }

    /// Whether [`CancelHandle::cancel`] has been called.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl CancelHandle {
    /// Signals cancellation to every [`CancelToken`] sharing this handle's
    /// flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Expiration to apply on `Set`.
#[derive(Debug, Clone, Copy, Default)]
pub enum Expiration {
    /// Use the cache's configured `default_ttl`.
    #[default]
    Default,
    /// Apply this TTL to this entry only.
    After(Duration),
    /// This entry never expires, regardless of the cache's default.
    Never,
}

const NIL: usize = usize::MAX;

struct Node<K> {
    key: K,
    prev: usize,
    next: usize,
}

/// Intrusive doubly-linked LRU list implemented as a safe index arena
/// (`Vec<Node<K>>` + free list) instead of raw pointers, so the cycle
/// between "most recently used" and "least recently used" never needs
/// `unsafe`.
struct LruList<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K> LruList<K> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn push_front(&mut self, key: K) -> usize {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(Node {
                    key,
                    prev: NIL,
                    next: self.head,
                });
                idx
            }
            None => {
                self.nodes.push(Some(Node {
                    key,
                    prev: NIL,
                    next: self.head,
                }));
                self.nodes.len() - 1
            }
        };

        if self.head != NIL {
            if let Some(old_head) = self.nodes[self.head].as_mut() {
                old_head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        idx
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(n) => (n.prev, n.next),
            None => return,
        };

        match prev {
            NIL => self.head = next,
            p => {
                if let Some(n) = self.nodes[p].as_mut() {
                    n.next = next;
                }
            }
        }
        match next {
            NIL => self.tail = prev,
            n => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
        }
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        self.nodes[idx] = None;
        self.free.push(idx);
    }

    /// Moves an existing node to the front (most recently used position).
    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        if let Some(n) = self.nodes[idx].as_mut() {
            n.prev = NIL;
            n.next = self.head;
        }
        if let Some(n) = self.nodes[self.head].as_mut() {
            n.prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn pop_back(&mut self) -> Option<K> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        let key = self.nodes[idx].take().map(|n| n.key);
        self.free.push(idx);
        key
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    node: usize,
}

struct Inner<K, V> {
    map: FxHashMap<K, Entry<V>>,
    lru: LruList<K>,
    closed: bool,
}

/// A single TTL-and-LRU cache map.
///
/// `Get`/`Set`/`Delete`/`Exists`/`Clear` all take an optional
/// [`CancelToken`], checked once before the lock is taken. `Close` stops
/// the background sweeper (if one is running) and makes every subsequent
/// operation return [`HandlerError::Closed`].
pub struct Cache<K, V> {
    inner: RwLock<Inner<K, V>>,
    config: CacheConfig,
    metrics: AtomicMetrics,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a cache and, if `cleanup_interval` is set, spawns the
    /// background sweeper on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime and `cleanup_interval` is
    /// `Some`, same as any other `tokio::spawn` call.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self {
            inner: RwLock::new(Inner {
                map: FxHashMap::default(),
                lru: LruList::new(),
                closed: false,
            }),
            metrics: AtomicMetrics::new(config.enable_metrics),
            sweeper: parking_lot::Mutex::new(None),
            config,
        });

        if let Some(interval) = cache.config.cleanup_interval {
            let weak = Arc::downgrade(&cache);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(cache) = weak.upgrade() else {
                        return;
                    };
                    cache.sweep_expired();
                }
            });

            *cache.sweeper.lock() = Some(handle);
        }

        cache
    }

    fn check_cancel(cancel: Option<&CancelToken>) -> CacheResult<()> {
        if cancel.is_some_and(CancelToken::is_canceled) {
            return Err(HandlerError::Canceled);
        }
        Ok(())
    }

    fn ttl_for(&self, expiration: Expiration) -> Option<Instant> {
        match expiration {
            Expiration::Default => self.config.default_ttl.map(|d| Instant::now() + d),
            Expiration::After(d) => Some(Instant::now() + d),
            Expiration::Never => None,
        }
    }

    fn is_expired(entry: &Entry<V>) -> bool {
        entry.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Returns a clone of the value for `key`, refreshing its LRU
    /// position. A lazily-discovered expired entry is removed and counted
    /// as both a miss and an expiration.
    pub fn get(&self, key: &K, cancel: Option<&CancelToken>) -> CacheResult<V> {
        Self::check_cancel(cancel)?;

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(HandlerError::Closed);
        }

        let Some(entry) = inner.map.get(key) else {
            self.metrics.record_miss();
            return Err(HandlerError::NotFound);
        };

        if Self::is_expired(entry) {
            let node = entry.node;
            inner.map.remove(key);
            inner.lru.remove(node);
            self.metrics.dec_size();
            self.metrics.record_miss();
            self.metrics.record_expiration();
            return Err(HandlerError::NotFound);
        }

        let node = entry.node;
        let value = entry.value.clone();
        inner.lru.touch(node);
        self.metrics.record_hit();
        Ok(value)
    }

    /// Inserts or overwrites `key`. Evicts according to
    /// [`EvictionMode`](crate::limits::EvictionMode) when the cache is at
    /// `max_size` and `key` is not already present.
    pub fn set(
        &self,
        key: K,
        value: V,
        expiration: Expiration,
        cancel: Option<&CancelToken>,
    ) -> CacheResult<()> {
        Self::check_cancel(cancel)?;

        let expires_at = self.ttl_for(expiration);
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(HandlerError::Closed);
        }

        if let Some(existing) = inner.map.get_mut(&key) {
            existing.value = value;
            existing.expires_at = expires_at;
            let node = existing.node;
            inner.lru.touch(node);
            self.metrics.record_set();
            return Ok(());
        }

        if inner.map.len() >= self.config.max_size {
            match self.config.eviction_mode {
                EvictionMode::Lru => {
                    let Some(evicted_key) = inner.lru.pop_back() else {
                        return Err(HandlerError::EvictionFailed);
                    };
                    inner.map.remove(&evicted_key);
                    self.metrics.dec_size();
                    self.metrics.record_eviction();
                }
                EvictionMode::None | EvictionMode::Lfu | EvictionMode::Random => {
                    return Err(HandlerError::EvictionFailed);
                }
            }
        }

        let node = inner.lru.push_front(key.clone());
        inner.map.insert(
            key,
            Entry {
                value,
                expires_at,
                node,
            },
        );
        self.metrics.inc_size();
        self.metrics.record_set();
        Ok(())
    }

    /// Removes `key` if present. Not an error if it was already absent.
    pub fn delete(&self, key: &K, cancel: Option<&CancelToken>) -> CacheResult<()> {
        Self::check_cancel(cancel)?;

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(HandlerError::Closed);
        }

        if let Some(entry) = inner.map.remove(key) {
            inner.lru.remove(entry.node);
            self.metrics.dec_size();
        }
        self.metrics.record_delete();
        Ok(())
    }

    /// Whether `key` is present and unexpired, without refreshing its LRU
    /// position.
    pub fn exists(&self, key: &K, cancel: Option<&CancelToken>) -> CacheResult<bool> {
        Self::check_cancel(cancel)?;

        let inner = self.inner.read();
        if inner.closed {
            return Err(HandlerError::Closed);
        }

        Ok(inner.map.get(key).is_some_and(|e| !Self::is_expired(e)))
    }

    /// Removes every entry.
    pub fn clear(&self, cancel: Option<&CancelToken>) -> CacheResult<()> {
        Self::check_cancel(cancel)?;

        let mut inner = self.inner.write();
        if inner.closed {
            return Err(HandlerError::Closed);
        }

        let count = inner.map.len();
        inner.map.clear();
        inner.lru.clear();
        self.metrics.set_size(0);
        for _ in 0..count {
            self.metrics.record_delete();
        }
        Ok(())
    }

    /// Stops the background sweeper (if any) and makes every subsequent
    /// operation return [`HandlerError::Closed`]. Idempotent.
    pub fn close(&self) {
        self.inner.write().closed = true;
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Number of live entries, including ones that have expired but have
    /// not yet been swept or touched.
    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> metrics::Snapshot {
        self.metrics.snapshot()
    }

    fn sweep_expired(&self) {
        let mut inner = self.inner.write();
        if inner.closed {
            return;
        }

        let expired: Vec<K> = inner
            .map
            .iter()
            .filter(|(_, entry)| Self::is_expired(entry))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = inner.map.remove(key) {
                inner.lru.remove(entry.node);
                self.metrics.dec_size();
                self.metrics.record_expiration();
            }
        }
    }
}
