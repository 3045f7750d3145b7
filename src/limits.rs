//! Server, connection, request/response, and cache configuration.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.
//!
//! # Examples
//!
//! ```no_run
//! weft::impt_default_router!{router}
//! use weft::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .router(router())
//!         .server_limits(ServerLimits {
//!             max_connections: 5000, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,      // More headers for complex APIs
//!             body_size: 16 * 1024,  // 16KB for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, queueing, and performance behavior.
///
/// Configures how the server handles connection admission, worker pools,
/// and overload protection with tunable parameters for different workloads.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Handler ] <====== | Is there a free handler? | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The queue acts as a buffer between connection acceptance and processing.
/// Workers continuously poll the queue using the configured `wait_strategy`.
///
/// A worker is a continuously running asynchronous task, created once during
/// initialization (from [`tokio::spawn`]). It runs in an infinite loop,
/// processing connections from a shared queue, which is replenished by a TCP
/// listener. This design eliminates the need to create tasks for each
/// connection, allowing for efficient resource reuse.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrent active connections being processed
    /// (default: `100`). Corresponds to `MaxConcurrentConnections` with
    /// `0` mapped to "unlimited" treated as "as many workers as fit in
    /// memory" — callers wanting unbounded concurrency should pass a large
    /// value explicitly, since the worker pool is pre-spawned at `build()`.
    pub max_connections: usize,

    /// Maximum number of TCP connections waiting in the admission queue
    /// (default: `250`). If the queue becomes full, new connections receive
    /// immediate HTTP `503` responses (or are dropped, see
    /// `count_503_handlers`).
    pub max_pending_connections: usize,

    /// Strategy for worker task waiting behavior (default: `Sleep(50us)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated tasks for queue overflow responses (default: `1`).
    ///
    /// Set to `0` to silently close the connection instead of sending a
    /// 503 (not recommended for production HTTP servers).
    pub count_503_handlers: usize,

    /// Format for router/parser error responses (default: `true`).
    ///
    /// If `true`, errors are structured JSON bodies; if `false`, bodies are
    /// empty and only the status line + `Connection: close` are sent.
    pub json_errors: bool,

    /// Enables the server-level observable counters returned by
    /// [`Server::stats`](crate::Server::stats) (default: `false`).
    /// Corresponds to `EnableStats`. When `false`, every counter update is
    /// a no-op branch rather than an atomic increment, so per-request time
    /// and byte-count tracking costs nothing unless asked for.
    pub enable_stats: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,
            enable_stats: false,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`].
    ///
    /// Burns close to a full core while idle; prefer `Sleep` unless you
    /// need the lowest possible wake-up latency.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`] with the given duration.
    Sleep(Duration),
}

/// Connection-level timeouts and per-connection request limits.
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for a complete header section once reading
    /// has started (default: `2 seconds`). Corresponds to `ReadTimeout`.
    /// Prevents slowloris-style attacks.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing the response (default: `3
    /// seconds`). Corresponds to `WriteTimeout`.
    pub socket_write_timeout: Duration,

    /// Maximum idle time between requests on a keep-alive connection
    /// (default: `120 seconds`). Corresponds to `IdleTimeout`. Distinct
    /// from `socket_read_timeout`, which only bounds reading one message
    /// once the connection has started delivering bytes for it.
    pub idle_timeout: Duration,

    /// Maximum number of requests allowed per connection, `0` = unlimited
    /// (default: `100`, a conservative deviation from the spec's own
    /// default of unlimited - see `connection_lifetime` for the backstop
    /// that still applies when this is set to `0`). Corresponds to
    /// `MaxKeepAliveRequests`.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from establishment to closure
    /// (default: `2 minutes`). Final safety net independent of the other
    /// timeouts.
    pub connection_lifetime: Duration,

    /// Forces every connection closed after one response regardless of
    /// what the request or response asked for (default: `false`).
    /// Corresponds to `DisableKeepalive`.
    pub disable_keepalive: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(120),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,
            disable_keepalive: false,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// **SECURITY-FIRST DEFAULTS**: these limits are intentionally conservative
/// to prevent resource exhaustion and parsing attacks. They work well for
/// simple REST APIs, microservices, internal tools, and low-memory
/// environments.
///
/// You MAY need to increase these if you see `413 Payload Too Large` for
/// legitimate requests, `414 URI Too Long` for normal API calls, or
/// `431 Request Header Fields Too Large`.
///
/// # Memory Allocation Strategy
///
/// Each TCP connection pre-allocates a fixed-size buffer based on these
/// limits:
///
/// ```text
/// Total Buffer = First Line + (Headers x Header Line) + Body + Overhead
/// ```
///
/// # Example
/// ```
/// use weft::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_size = limits.estimated_buffer_size();
/// println!("Each connection needs {} bytes for data buffer", buffer_size);
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string
    /// (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in URL (default: `8 segments`).
    pub url_parts: usize,
    /// Maximum query string length (default: `128 B`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `32`, matching the
    /// parser's fixed inline header array — `HeaderOverflow` is returned
    /// past this, no heap-spill fallback).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512 B`).
    pub header_value_size: usize,

    /// Maximum request body size in bytes (default: `10 MiB`, matching
    /// `MaxRequestBodySize`).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 32,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 10 * 1024 * 1024,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated memory buffer size required per connection.
    ///
    /// This calculates the total buffer size needed to parse HTTP requests
    /// based on the current limits: request line, headers (name + value
    /// each), body, and CRLF terminators. Does not include the parser
    /// struct's own size (~64 bytes).
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;

        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n" + Body
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2 + self.body_size
    }

    #[inline(always)]
    // GET /url/test HTTP/1.1\r\n
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Authorization: Sample%20Data\r\n
    // Formula: Name + ": " + Value + "\r\n"
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
    pub(crate) h_line: usize,
}

/// Configuration for response processing and memory allocation limits.
///
/// Based on the configured limits, response buffers are managed as follows:
/// ```rust
/// # use weft::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<()> = Vec::with_capacity(limits.default_capacity);
/// #
/// // `buffer` is Vec
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses, corresponds to
    /// `WriteBufferSize` (default: `4096 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`).
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 4096,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

/// Eviction policy applied when a cache reaches `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionMode {
    /// Never evicts; `Set` fails with `EvictionFailed` when full.
    None,
    /// Evict the tail of the LRU list.
    #[default]
    Lru,
    /// Reserved for future use; not implemented in the core.
    Lfu,
    /// Reserved for future use; not implemented in the core.
    Random,
}

/// Configuration for a single [`Cache`](crate::cache::Cache) instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction kicks in (default:
    /// `10_000`).
    pub max_size: usize,
    /// Default time-to-live applied when `Set` is called without an
    /// explicit TTL option, `None` = no expiration (default: `None`).
    pub default_ttl: Option<Duration>,
    /// Eviction policy applied when the cache is full (default: `Lru`).
    pub eviction_mode: EvictionMode,
    /// Interval at which the background sweeper removes expired entries,
    /// `None` disables the sweeper and expirations are reclaimed lazily on
    /// access only (default: `Some(60s)`).
    pub cleanup_interval: Option<Duration>,
    /// Whether `Record*` metric calls do any work (default: `false`; when
    /// `false` they are no-ops, matching `EnableMetrics`).
    pub enable_metrics: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_ttl: None,
            eviction_mode: EvictionMode::Lru,
            cleanup_interval: Some(Duration::from_secs(60)),
            enable_metrics: false,

            _priv: (),
        }
    }
}

/// Configuration for a [`ShardedCache`](crate::cache::ShardedCache).
#[derive(Debug, Clone)]
pub struct ShardedCacheConfig {
    /// Base configuration applied to every shard (per-shard `max_size` is
    /// derived from `cache.max_size / shard_count`).
    pub cache: CacheConfig,
    /// Number of shards, rounded up to the next power of two (default:
    /// `32`).
    pub shard_count: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ShardedCacheConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            shard_count: 32,

            _priv: (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_limits_buffer_size() {
        let limits = ReqLimits::default();
        let size = limits.estimated_buffer_size();
        assert!(size > limits.body_size);
    }

    #[test]
    fn cache_config_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.max_size, 10_000);
        assert_eq!(cfg.eviction_mode, EvictionMode::Lru);
        assert!(cfg.cleanup_interval.is_some());
    }

    #[test]
    fn sharded_cache_config_defaults() {
        let cfg = ShardedCacheConfig::default();
        assert_eq!(cfg.shard_count, 32);
    }
}
