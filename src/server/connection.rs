use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::Version,
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    router::{Context, Router},
    server::{server_impl::AllLimits, stats::ServerStats},
};
use std::{
    net::SocketAddr,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
    time::Instant,
};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

pub(crate) struct HttpConnection {
    router: Arc<Router>,
    context: Context,
    stats: Arc<ServerStats>,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(router: Arc<Router>, limits: AllLimits, stats: Arc<ServerStats>) -> Self {
        Self {
            router,
            context: Context::new(),
            stats,

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.context.reset();
    }
}

impl HttpConnection {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;

        self.stats.record_connection_opened();
        let result = self.impl_run(stream).await;
        self.stats.record_connection_closed();

        match result {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => {
                self.stats.record_connection_error();
                Err(e.0)
            }
            Err(error) => {
                self.stats.record_request_error();
                self.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();

        while !self.is_expired() {
            self.reset_request_response();

            // The very first request on a fresh connection is bounded by
            // `socket_read_timeout` (the "Reading" state's `ReadTimeout`);
            // subsequent ones are bounded by `idle_timeout` instead (the
            // "Idle between requests" state's `IdleTimeout`) since the
            // connection is waiting on the client's next pipelined
            // request, not mid-header.
            let read_timeout = if self.connection.request_count == 0 {
                self.conn_limits.socket_read_timeout
            } else {
                self.conn_limits.idle_timeout
            };

            let read = match self.parser.fill_buffer(stream, read_timeout).await {
                Ok(read) => read,
                // An idle timeout between keep-alive requests is a clean
                // close, not a connection error (§4.3: "timeout
                // transitions to Closing without error").
                Err(e)
                    if self.connection.request_count > 0
                        && e.kind() == io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if read == 0 {
                break;
            }
            self.stats.record_bytes_read(read);

            self.response.version = self.parse()?;
            self.apply_keepalive_policy();

            self.dispatch().await;
            self.stats.record_request();

            let written = self.response.buffer().len();
            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;
            self.stats.record_bytes_written(written);

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Runs the router/middleware chain against the current request, recovering
    /// from handler panics so a single bad route can't take the connection (or the
    /// worker task) down with it.
    #[inline]
    async fn dispatch(&mut self) {
        let router = Arc::clone(&self.router);
        let fut = router.dispatch(&mut self.context, &self.request, &mut self.response);
        let guarded = CatchUnwind {
            future: Box::pin(fut),
        };

        if guarded.await.is_err() {
            tracing::error!("handler panicked, returning 500");
            self.response.reset(&self.resp_limits);
            self.response
                .status(crate::http::types::StatusCode::InternalServerError)
                .close()
                .body("");
        }
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

impl HttpConnection {
    /// Forces the just-parsed request's response closed when
    /// `ConnLimits::disable_keepalive` is set, overriding whatever the
    /// request/protocol would otherwise have negotiated. Runs after
    /// `parse()` (which sets the initial `keep_alive` from the request)
    /// and before dispatch, so handlers can still call `resp.close()`
    /// themselves but can never undo this override.
    #[inline]
    fn apply_keepalive_policy(&mut self) {
        if self.conn_limits.disable_keepalive {
            self.response.keep_alive = false;
        }
    }

    #[inline]
    fn is_expired(&self) -> bool {
        let max_requests = self.conn_limits.max_requests_per_connection;
        !self.response.keep_alive
            || (max_requests != 0 && self.connection.request_count >= max_requests)
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

use std::io;

/// Adapts a boxed future so a panic raised while polling it surfaces as an `Err`
/// instead of unwinding through the worker task.
struct CatchUnwind<F> {
    future: Pin<Box<F>>,
}

impl<F: std::future::Future> std::future::Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn std::any::Any + Send>>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let future = &mut this.future;

        match std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
