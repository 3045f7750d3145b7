//! Process-wide, per-server observable counters, gated by
//! [`ServerLimits::enable_stats`](crate::limits::ServerLimits::enable_stats)
//! the same way [`cache::metrics`](crate::cache::metrics) gates per-cache
//! counters: when disabled, every `record_*` call is a no-op so the
//! per-request hot path pays nothing beyond a branch.
//!
//! `EnableStats` exists in the first place because per-request time
//! tracking (and, here, per-request byte accounting) otherwise allocates
//! or adds atomic traffic that a latency-sensitive deployment may not want
//! to pay for by default.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Point-in-time copy of every server-level counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub connection_errors: u64,
    pub request_errors: u64,
    /// Time since the server's [`ServerStats`] was created, i.e. since
    /// [`build`](crate::server::server_impl::ServerBuilder::build) ran.
    pub uptime: Duration,
}

/// Atomic counters backing [`Server::stats`](crate::Server::stats).
///
/// Separate from any lock (there is none here to separate it from, unlike
/// the cache's `RwLock` vs. `AtomicMetrics` split) - this struct exists
/// purely so every worker/connection can record an event with a single
/// relaxed fetch-add instead of routing through shared mutable state.
#[derive(Debug)]
pub(crate) struct ServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_requests: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    connection_errors: AtomicU64,
    request_errors: AtomicU64,
    start: Instant,
    enabled: bool,
}

impl ServerStats {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            request_errors: AtomicU64::new(0),
            start: Instant::now(),
            enabled,
        }
    }

    #[inline]
    pub(crate) fn record_connection_opened(&self) {
        if self.enabled {
            self.total_connections.fetch_add(1, Ordering::Relaxed);
            self.active_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_connection_closed(&self) {
        if self.enabled {
            self.active_connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some(v.saturating_sub(1))
                })
                .ok();
        }
    }

    #[inline]
    pub(crate) fn record_request(&self) {
        if self.enabled {
            self.total_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_bytes_read(&self, n: usize) {
        if self.enabled {
            self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_bytes_written(&self, n: usize) {
        if self.enabled {
            self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_connection_error(&self) {
        if self.enabled {
            self.connection_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_request_error(&self) {
        if self.enabled {
            self.request_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time snapshot of every counter, plus uptime since this
    /// `ServerStats` was created. Reads are independent relaxed loads with
    /// no cross-field consistency guarantee, same as
    /// [`cache::metrics::AtomicMetrics::snapshot`](crate::cache::metrics::AtomicMetrics::snapshot).
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            request_errors: self.request_errors.load(Ordering::Relaxed),
            uptime: self.start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stats_are_noops() {
        let s = ServerStats::new(false);
        s.record_connection_opened();
        s.record_request();
        s.record_bytes_read(128);
        let snap = s.snapshot();
        assert_eq!(snap.total_connections, 0);
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.bytes_read, 0);
    }

    #[test]
    fn enabled_stats_count_connections_and_requests() {
        let s = ServerStats::new(true);
        s.record_connection_opened();
        s.record_connection_opened();
        s.record_connection_closed();
        s.record_request();
        s.record_request();
        s.record_request();
        s.record_bytes_read(100);
        s.record_bytes_written(40);

        let snap = s.snapshot();
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.bytes_read, 100);
        assert_eq!(snap.bytes_written, 40);
    }

    #[test]
    fn active_connections_never_underflows() {
        let s = ServerStats::new(true);
        s.record_connection_closed();
        assert_eq!(s.snapshot().active_connections, 0);
    }

    #[test]
    fn errors_are_counted_independently() {
        let s = ServerStats::new(true);
        s.record_connection_error();
        s.record_request_error();
        s.record_request_error();
        let snap = s.snapshot();
        assert_eq!(snap.connection_errors, 1);
        assert_eq!(snap.request_errors, 2);
    }
}
