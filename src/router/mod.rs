//! Routing & dispatch: matches an incoming request to a handler chain and
//! runs it.
//!
//! [`Router`] holds a static table for exact `(method, path)` routes plus a
//! per-method trie for routes with `:name`/`*name` segments, both frozen at
//! [`RouterBuilder::build`]. Handlers and middleware share one signature
//! (see [`Handler`]) so a middleware is just a handler that optionally
//! calls the next one in the chain.
//!
//! Each connection's worker reuses one dispatch loop
//! (`server::connection::HttpConnection::dispatch`) across its whole
//! lifetime; routes are registered once here and every request walks a
//! pre-built chain instead of going through a single trait method per call.

pub mod context;

pub use context::Context;

use crate::{errors::HandlerError, http::types::Method, Request, Response, StatusCode};
use rustc_hash::FxHashMap;
use std::{future::Future, pin::Pin, sync::Arc};

pub use crate::http::response::Handled;

/// A future-returning handler or middleware step.
///
/// Implemented for any `Fn(&mut Context, &Request, &mut Response) -> Fut`
/// closure where `Fut: Future<Output = Result<Handled, HandlerError>>`, so
/// ordinary `async move` closures work directly - no manual boxing required
/// at the call site. Returning `Err` lets a handler or middleware signal a
/// typed [`HandlerError`] instead of hand-writing an error response; the
/// router routes it through the installed error handler (see
/// [`Router::dispatch`]).
/// The trait itself is generic over the borrow lifetime `'a` (rather than
/// carrying a single fixed associated future type) specifically so the
/// blanket impl below type-checks for closures that borrow their
/// arguments into the returned future, one of the few places in this
/// crate where that distinction matters.
pub trait Handler<'a>: Send + Sync {
    type Future: Future<Output = Result<Handled, HandlerError>> + Send + 'a;

    fn call(
        &'a self,
        ctx: &'a mut Context,
        req: &'a Request,
        resp: &'a mut Response,
    ) -> Self::Future;
}

impl<'a, F, Fut> Handler<'a> for F
where
    F: Fn(&'a mut Context, &'a Request, &'a mut Response) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Handled, HandlerError>> + Send + 'a,
{
    type Future = Fut;

    fn call(
        &'a self,
        ctx: &'a mut Context,
        req: &'a Request,
        resp: &'a mut Response,
    ) -> Fut {
        self(ctx, req, resp)
    }
}

/// Object-safe, type-erased form of [`Handler`], used to store
/// heterogeneous handlers and middleware-wrapped chains in the same
/// table/trie.
pub trait DynHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        req: &'a Request,
        resp: &'a mut Response,
    ) -> Pin<Box<dyn Future<Output = Result<Handled, HandlerError>> + Send + 'a>>;
}

impl<T> DynHandler for T
where
    T: for<'a> Handler<'a> + Send + Sync,
{
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        req: &'a Request,
        resp: &'a mut Response,
    ) -> Pin<Box<dyn Future<Output = Result<Handled, HandlerError>> + Send + 'a>> {
        Box::pin(Handler::call(self, ctx, req, resp))
    }
}

/// Wraps a plain closure into an `Arc<dyn DynHandler>`.
///
/// Middleware constructors use this to build the handler they hand back
/// to the router after deciding whether (and how) to call the `next`
/// handler they were given.
pub fn handler_fn<F>(f: F) -> Arc<dyn DynHandler>
where
    F: for<'a> Handler<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A middleware step: given the next handler in the chain, returns the
/// handler that should actually run. Composed once, at
/// [`RouterBuilder::build`], as `m1(m2(...mN(terminal)))`.
pub type Middleware = Arc<dyn Fn(Arc<dyn DynHandler>) -> Arc<dyn DynHandler> + Send + Sync>;

/// Writes the crate's default JSON error body for a [`HandlerError`].
///
/// [`Router`] calls this whenever a handler or middleware returns `Err`
/// (and for unmatched routes) unless a custom handler was installed via
/// [`RouterBuilder::error_handler`].
pub fn default_error_response(err: HandlerError, resp: &mut Response) -> Handled {
    resp.status(err.status_code())
        .header("content-type", "application/json")
        .body_with(|w| {
            w.write(b"{\"error\":\"");
            w.write(err.message());
            w.write(b"\",\"code\":\"");
            w.write(err.code());
            w.write(b"\"}");
        })
}

type ErrorHandler = Arc<dyn Fn(HandlerError, &mut Response) -> Handled + Send + Sync>;

mod trie;
use trie::MethodTrie;

const METHODS: usize = 7;

#[inline]
const fn method_index(method: Method) -> usize {
    match method {
        Method::Get => 0,
        Method::Put => 1,
        Method::Post => 2,
        Method::Head => 3,
        Method::Patch => 4,
        Method::Delete => 5,
        Method::Options => 6,
    }
}

/// A frozen routing table: an exact-match static table plus a per-method
/// trie for `:name`/`*name` routes, both built once by
/// [`RouterBuilder::build`] and never mutated afterward. Always used
/// behind `Arc<Router>` (see `server::server_impl::ServerBuilder::router`),
/// which gives the "rebuild, then swap the pointer" semantics a
/// copy-on-write table normally needs without any extra machinery here.
pub struct Router {
    static_table: FxHashMap<(Method, Box<str>), Arc<dyn DynHandler>>,
    tries: [MethodTrie; METHODS],
    error_handler: ErrorHandler,
}

impl Router {
    /// Runs the router against one request: look up a route, run its
    /// handler chain, and route either a miss or a handler-returned
    /// [`HandlerError`] through the installed error handler (404 miss by
    /// default).
    pub(crate) async fn dispatch(&self, ctx: &mut Context, req: &Request, resp: &mut Response) {
        let method = req.method();
        let path = req.url().path();

        if let Some(handler) = self.static_table.get(&(method, path_key(path))) {
            if let Err(err) = handler.call(ctx, req, resp).await {
                (self.error_handler)(err, resp);
            }
            return;
        }

        if let Some((handler, params)) = self.tries[method_index(method)].lookup(path) {
            for (name, value) in &params {
                ctx.push_param(*name, value);
            }
            if let Err(err) = handler.call(ctx, req, resp).await {
                (self.error_handler)(err, resp);
            }
            return;
        }

        (self.error_handler)(HandlerError::NotFound, resp);
    }
}

fn path_key(path: &[u8]) -> Box<str> {
    std::str::from_utf8(path)
        .unwrap_or("")
        .trim_matches('/')
        .into()
}

/// Builder for a [`Router`]. Register routes with [`get`](Self::get) and
/// its sibling methods, optionally add [`middleware`](Self::middleware) or
/// a custom [`error_handler`](Self::error_handler), then [`build`](Self::build).
pub struct RouterBuilder {
    routes: Vec<(Method, String, Arc<dyn DynHandler>)>,
    middleware: Vec<Middleware>,
    error_handler: Option<ErrorHandler>,
}

macro_rules! verb_methods {
    ($($name:ident => $method:expr),* $(,)?) => {
        $(
            #[doc = concat!("Registers a handler for `", stringify!($method), " pattern`.")]
            pub fn $name<F>(self, pattern: &str, handler: F) -> Self
            where
                F: for<'a> Handler<'a> + Send + Sync + 'static,
            {
                self.route($method, pattern, handler)
            }
        )*
    };
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            middleware: Vec::new(),
            error_handler: None,
        }
    }

    fn route<F>(mut self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: for<'a> Handler<'a> + Send + Sync + 'static,
    {
        self.routes.push((method, pattern.to_string(), Arc::new(handler)));
        self
    }

    verb_methods! {
        get => Method::Get,
        put => Method::Put,
        post => Method::Post,
        head => Method::Head,
        patch => Method::Patch,
        delete => Method::Delete,
        options => Method::Options,
    }

    /// Adds a middleware step. Middleware runs in registration order:
    /// the first one added is the outermost wrapper around the final
    /// chain, so it sees the request first and the response last.
    pub fn middleware<F>(mut self, f: F) -> Self
    where
        F: Fn(Arc<dyn DynHandler>) -> Arc<dyn DynHandler> + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(f));
        self
    }

    /// Overrides the handler used for unmatched routes (and any other
    /// router-level [`HandlerError`]). Defaults to
    /// [`default_error_response`].
    pub fn error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(HandlerError, &mut Response) -> Handled + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(f));
        self
    }

    /// Freezes the builder into an immutable [`Router`].
    ///
    /// # Panics
    /// Panics if a pattern contains a `*wildcard` segment that isn't the
    /// last segment, or if two routes are registered for the same
    /// `(method, pattern)`.
    #[track_caller]
    pub fn build(self) -> Router {
        let wrap = |handler: Arc<dyn DynHandler>| -> Arc<dyn DynHandler> {
            self.middleware
                .iter()
                .rev()
                .fold(handler, |next, mw| mw(next))
        };

        let mut static_table = FxHashMap::default();
        let mut tries: [MethodTrie; METHODS] = Default::default();

        for (method, pattern, handler) in self.routes {
            let handler = wrap(handler);

            if trie::is_static(&pattern) {
                let key = (method, pattern.trim_matches('/').into());
                assert!(
                    static_table.insert(key, handler).is_none(),
                    "duplicate route registered for this method and pattern"
                );
            } else {
                tries[method_index(method)].insert(&pattern, handler);
            }
        }

        Router {
            static_table,
            tries,
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(default_error_response)),
        }
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
