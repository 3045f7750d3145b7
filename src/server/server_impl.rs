use crate::{
    errors::ErrorKind,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    router::Router,
    server::{connection::HttpConnection, stats::ServerStats},
    Version,
};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::{sleep as tokio_sleep, sleep_until as tokio_sleep_until, Instant as TokioInstant},
};

/// How often the accept loop re-checks [`ShutdownState::flag`] while
/// otherwise idle waiting on a new connection.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared shutdown signal observed by the accept loop in [`Server::launch`]
/// and every pre-spawned worker loop.
///
/// `flag` alone stops new work from being picked up; `deadline`, set once
/// [`Server::shutdown`] is called, lets a worker mid-`conn.run` race its
/// current connection against the grace period and force-close the socket
/// if the connection doesn't finish in time.
struct ShutdownState {
    flag: AtomicBool,
    deadline: Mutex<Option<Instant>>,
}

impl ShutdownState {
    fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            deadline: Mutex::new(None),
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    fn begin(&self, grace: Duration) {
        *self.deadline.lock() = Some(Instant::now() + grace);
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// An HTTP server that processes incoming connections and requests through a
/// [`Router`].
///
/// The server uses a pre-allocated connection pool for maximum performance
/// and implements graceful connection handling with configurable limits.
///
/// # Examples
///
/// ```no_run
/// use weft::{Server, router::RouterBuilder, StatusCode};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     let router = RouterBuilder::new()
///         .get("/", |_ctx, _req, resp| async move {
///             Ok(resp.status(StatusCode::Ok).body("Hello world!"))
///         })
///         .build();
///
///     let server = Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .router(router)
///         .build();
///
///     server.launch().await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
    stats: Arc<ServerStats>,
    shutdown: Arc<ShutdownState>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # weft::impt_default_router!{router}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use weft::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(router())
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            router: None,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
        }
    }

    /// Starts the server and begins accepting incoming connections.
    ///
    /// Runs until [`shutdown`](Server::shutdown) is driven concurrently
    /// from another task holding the same `Server` (typically behind an
    /// `Arc`, since this takes `&self` rather than consuming the server).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # weft::impt_default_router!{router}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use weft::Server;
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(router())
    ///     .build();
    ///
    /// server.launch().await
    /// # }
    /// ```
    #[inline]
    pub async fn launch(&self) {
        loop {
            if self.shutdown.is_shutting_down() {
                return;
            }

            let accepted = tokio::select! {
                biased;
                accepted = self.listener.accept() => accepted,
                _ = tokio_sleep(SHUTDOWN_POLL_INTERVAL) => continue,
            };

            let Ok(value) = accepted else {
                continue;
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => self.error_queue.push(value),
            }
        }
    }

    /// Point-in-time snapshot of the server-level observable counters
    /// (total/active connections, total requests, bytes read/written,
    /// connection/request errors, uptime).
    ///
    /// Every field is `0` (and `uptime` keeps advancing) unless
    /// [`ServerLimits::enable_stats`] was set on the builder - counting
    /// these is not free, so it's opt-in.
    #[inline]
    pub fn stats(&self) -> crate::server::stats::StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops admitting new connections, lets in-flight connections finish
    /// their current request and close, and force-closes whatever's still
    /// open once `grace` elapses.
    ///
    /// Sets the shared shutdown signal first: `launch`'s accept loop stops
    /// pushing new connections onto the queue, and every pre-spawned
    /// worker stops pulling new ones off it once its current connection
    /// finishes. After sleeping out `grace`, any worker still mid-request
    /// races its connection against the deadline (set when this method
    /// started) and force-closes the socket if it lost; this call then
    /// drops whatever never got picked off either queue.
    ///
    /// Worker tasks are pre-spawned for the lifetime of the process and
    /// exit on their own once the queue is empty and the shutdown signal
    /// is set, so this does not join them.
    #[inline]
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.begin(grace);
        tokio_sleep(grace).await;

        while let Some((stream, _)) = self.stream_queue.pop() {
            drop(stream);
        }
        while let Some((stream, _)) = self.error_queue.pop() {
            drop(stream);
        }
    }

    /// Pulls the next queued stream, or `None` once the shutdown signal is
    /// set and the queue has run dry - the caller should stop its loop in
    /// that case rather than waiting for work that will never arrive.
    #[inline]
    async fn get_stream(
        queue: &TcpQueue,
        wait: &WaitStrategy,
        shutdown: &ShutdownState,
    ) -> Option<(TcpStream, SocketAddr)> {
        loop {
            if let Some(value) = queue.pop() {
                return Some(value);
            }

            if shutdown.is_shutting_down() {
                return None;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Option<Arc<Router>>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the router that will dispatch incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Configures server-level concurrency, queueing, and overload behavior.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # weft::impt_default_router!{router}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use weft::{Server, limits::ServerLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(router())
    ///     .server_limits(ServerLimits {
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and per-connection request limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # weft::impt_default_router!{router}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use weft::{Server, limits::ConnLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(router())
    ///     .connection_limits(ConnLimits {
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         connection_lifetime: Duration::from_secs(200),
    ///         ..ConnLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # weft::impt_default_router!{router}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use weft::{Server, limits::ReqLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(router())
    ///     .request_limits(ReqLimits {
    ///         url_size: 1024,
    ///         url_query_parts: 32,
    ///         url_parts: 20,
    ///         ..ReqLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # weft::impt_default_router!{router}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use weft::{Server, limits::RespLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .router(router())
    ///     .response_limits(RespLimits {
    ///         default_capacity: 1024,
    ///         max_capacity: 4096,
    ///         ..RespLimits::default()
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `router` method must be called to create``
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, router, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());
        let stats = Arc::new(ServerStats::new(limits.0.enable_stats));
        let shutdown = Arc::new(ShutdownState::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &router, &stats, &shutdown);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits, &shutdown);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits, &shutdown);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
            stats,
            shutdown,
        }
    }

    #[inline]
    fn spawn_worker(
        queue: &TcpQueue,
        limits: &AllLimits,
        router: &Arc<Router>,
        stats: &Arc<ServerStats>,
        shutdown: &Arc<ShutdownState>,
    ) {
        let queue = queue.clone();
        let shutdown = Arc::clone(shutdown);
        let mut conn = HttpConnection::new(Arc::clone(router), limits.clone(), Arc::clone(stats));

        tokio::spawn(async move {
            loop {
                let Some((mut stream, client_addr)) =
                    Server::get_stream(&queue, &conn.server_limits.wait_strategy, &shutdown).await
                else {
                    return;
                };

                let Ok(server_addr) = stream.local_addr() else {
                    continue;
                };

                match shutdown.deadline() {
                    Some(deadline) => {
                        tokio::select! {
                            _ = conn.run(&mut stream, client_addr, server_addr) => {}
                            _ = tokio_sleep_until(TokioInstant::from_std(deadline)) => {
                                drop(stream);
                            }
                        }
                    }
                    None => {
                        let _ = conn.run(&mut stream, client_addr, server_addr).await;
                    }
                }
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits, shutdown: &Arc<ShutdownState>) {
        let queue = queue.clone();
        let shutdown = Arc::clone(shutdown);
        let (server_limits, conn_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let Some((mut stream, _)) =
                    Server::get_stream(&queue, &server_limits.wait_strategy, &shutdown).await
                else {
                    return;
                };

                let _ = conn_limits
                    .send_error(
                        &mut stream,
                        ErrorKind::ServiceUnavailable,
                        Version::Http11,
                        server_limits.json_errors,
                    )
                    .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits, shutdown: &Arc<ShutdownState>) {
        let queue = queue.clone();
        let shutdown = Arc::clone(shutdown);
        let (server_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let Some((stream, _)) =
                    Server::get_stream(&queue, &server_limits.wait_strategy, &shutdown).await
                else {
                    return;
                };

                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<Router>, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.router
                .expect("The `router` method must be called to create"),
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.request_limits
                    .clone()
                    .unwrap_or_default()
                    .precalculate(),
                self.response_limits.clone().unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);
