//! weft - a low-allocation HTTP/1.1 serving core.
//!
//! Three tightly coupled subsystems, leaves first:
//!
//! - [`http`]/wire engine: zero-copy [`Request`] parsing and a pooled,
//!   reusable [`Response`] writer with keep-alive framing.
//! - [`router`]: a hybrid static-map + radix-tree dispatcher with inline
//!   parameter storage ([`router::Context`]) and ordered middleware
//!   composition.
//! - [`cache`]: a generic TTL+LRU map ([`cache::Cache`]) with an optional
//!   sharded variant ([`cache::ShardedCache`]) for write-lock contention at
//!   scale, both with lock-free [`cache::metrics`].
//!
//! [`Server`] drives the connection state machine over all three: read a
//! message, hand it to the [`router::Router`], write the response, loop on
//! keep-alive.
//!
//! # Quick start
//!
//! ```no_run
//! use weft::{router::RouterBuilder, Server, StatusCode};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = RouterBuilder::new()
//!         .get("/ping", |_ctx, _req, resp| async move {
//!             Ok(resp.status(StatusCode::Ok).body("pong"))
//!         })
//!         .build();
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .router(router)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! # Scope
//!
//! This crate is the serving *core*: HTTP/1.1 only, no TLS termination, no
//! HTTP/2 or HTTP/3, no cross-process cache coordination or persistence.
//! Middleware bodies (CORS, logging, rate limiting, ...) are the caller's
//! responsibility; this crate only supplies the composition contract (see
//! [`router::RouterBuilder::middleware`]).

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod stats;
}
pub(crate) mod errors;
pub mod cache;
pub mod limits;
pub mod router;

pub use crate::{
    errors::HandlerError,
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::{
        server_impl::{Server, ServerBuilder},
        stats::StatsSnapshot,
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

/// Defines a `fn $name() -> router::Router` building a trivial
/// `GET /*path -> "ok"` router, for doctests and quick smoke checks.
#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_router {
    ($name:ident) => {
        fn $name() -> weft::router::Router {
            weft::router::RouterBuilder::new()
                .get("/*path", |_ctx, _req, resp| async move {
                    Ok(resp.status(weft::StatusCode::Ok).body("ok"))
                })
                .build()
        }
    };
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
