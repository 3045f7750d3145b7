//! Per-request scratch state: route parameters, query parameters, and a
//! small user-value bag, all reused across requests on the worker that
//! owns this `Context` the same way `Request`/`Response`/`Parser` are.

use crate::{
    http::query::Query,
    router::Handled,
    Request, Response, StatusCode, WriteBuffer,
};
use rustc_hash::FxHashMap;
use std::any::Any;

const PARAM_INLINE: usize = 8;
const QUERY_INLINE: usize = 16;

/// A small owned byte buffer reused across requests via `clear()` instead
/// of being reallocated.
#[derive(Default, Clone)]
struct Buf(Vec<u8>);

impl Buf {
    fn set(&mut self, bytes: &[u8]) {
        self.0.clear();
        self.0.extend_from_slice(bytes);
    }

    fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Route parameters captured during dispatch: a fixed inline array sized
/// for the common case (`/users/:id` style routes rarely exceed a
/// handful of segments) backed by an overflow map for patterns with more
/// named/wildcard segments than that.
struct Params {
    inline: [(&'static str, Buf); PARAM_INLINE],
    len: usize,
    overflow: FxHashMap<&'static str, Buf>,
}

impl Params {
    fn new() -> Self {
        Self {
            inline: std::array::from_fn(|_| ("", Buf::default())),
            len: 0,
            overflow: FxHashMap::default(),
        }
    }

    fn reset(&mut self) {
        for slot in self.inline[..self.len].iter_mut() {
            slot.1 .0.clear();
        }
        self.len = 0;
        self.overflow.clear();
    }

    fn push(&mut self, name: &'static str, value: &[u8]) {
        if self.len < PARAM_INLINE {
            self.inline[self.len].0 = name;
            self.inline[self.len].1.set(value);
            self.len += 1;
        } else {
            self.overflow.entry(name).or_default().set(value);
        }
    }

    fn get(&self, name: &str) -> Option<&[u8]> {
        self.inline[..self.len]
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_slice())
            .or_else(|| self.overflow.get(name).map(Buf::as_slice))
    }
}

/// Query-string parameters, parsed lazily on first access. Both name and
/// value are arbitrary request bytes, so (unlike route parameters) names
/// can't be leaked as `&'static str` and are owned too.
struct QueryParams {
    inline: [(Buf, Buf); QUERY_INLINE],
    len: usize,
    overflow: FxHashMap<Vec<u8>, Buf>,
}

impl QueryParams {
    fn new() -> Self {
        Self {
            inline: std::array::from_fn(|_| (Buf::default(), Buf::default())),
            len: 0,
            overflow: FxHashMap::default(),
        }
    }

    fn reset(&mut self) {
        for (name, value) in self.inline[..self.len].iter_mut() {
            name.0.clear();
            value.0.clear();
        }
        self.len = 0;
        self.overflow.clear();
    }

    fn push(&mut self, name: &[u8], value: &[u8]) {
        if self.len < QUERY_INLINE {
            self.inline[self.len].0.set(name);
            self.inline[self.len].1.set(value);
            self.len += 1;
        } else {
            self.overflow.entry(name.to_vec()).or_default().set(value);
        }
    }

    fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.inline[..self.len]
            .iter()
            .find(|(n, _)| n.as_slice() == name)
            .map(|(_, v)| v.as_slice())
            .or_else(|| self.overflow.get(name).map(Buf::as_slice))
    }
}

/// Per-request scratch object passed to every handler and middleware.
///
/// Acquired implicitly (it's a reused field on the connection that owns
/// it, see `server::connection::HttpConnection`) rather than drawn from a
/// separate pool; `reset()` is called once per request before dispatch,
/// the same way `Request`/`Response`/`Parser` are reset.
pub struct Context {
    params: Params,
    query: QueryParams,
    query_parsed: bool,
    values: Option<FxHashMap<String, Box<dyn Any + Send>>>,
}

impl Context {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            params: Params::new(),
            query: QueryParams::new(),
            query_parsed: false,
            values: None,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.params.reset();
        self.query.reset();
        self.query_parsed = false;
        if let Some(values) = self.values.as_mut() {
            values.clear();
        }
    }

    #[inline]
    pub(crate) fn push_param(&mut self, name: &'static str, value: &[u8]) {
        self.params.push(name, value);
    }

    /// Named route parameter captured by a `:name` segment, decoded as
    /// UTF-8. Returns `None` if the segment wasn't valid UTF-8 or no such
    /// parameter was captured for this route.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Named route parameter captured by a `:name` segment, as raw bytes.
    pub fn param_bytes(&self, name: &str) -> Option<&[u8]> {
        self.params.get(name)
    }

    fn ensure_query_parsed(&mut self, req: &Request) {
        if self.query_parsed {
            return;
        }
        self.query_parsed = true;

        let Some(raw) = req.url().query_full() else {
            return;
        };

        if let Ok(pairs) = Query::parse::<Vec<(&[u8], &[u8])>>(raw, usize::MAX) {
            for (name, value) in pairs {
                self.query.push(name, value);
            }
        }
    }

    /// Query-string parameter value, decoded as UTF-8. Query parsing
    /// happens lazily on first call and is cached for the rest of the
    /// request.
    pub fn query(&mut self, req: &Request, name: &str) -> Option<&str> {
        self.ensure_query_parsed(req);
        self.query.get(name.as_bytes()).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Query-string parameter value as raw bytes.
    pub fn query_bytes(&mut self, req: &Request, name: &[u8]) -> Option<&[u8]> {
        self.ensure_query_parsed(req);
        self.query.get(name)
    }

    /// Stores a value for the lifetime of this request, retrievable via
    /// [`get`](Context::get). Typically used by middleware to hand data
    /// (an authenticated user, a request id) down to the handler.
    pub fn set<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values
            .get_or_insert_with(FxHashMap::default)
            .insert(key.into(), Box::new(value));
    }

    /// Retrieves a value previously stored with [`set`](Context::set).
    pub fn get<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.values
            .as_ref()?
            .get(key)?
            .downcast_ref::<T>()
    }

    /// Convenience wrapper: writes a JSON body (already-serialized by the
    /// caller; this crate has no serde dependency to serialize on a
    /// handler's behalf) with the matching content-type header.
    pub fn json<T: WriteBuffer>(resp: &mut Response, status: StatusCode, body: T) -> Handled {
        resp.status(status)
            .header("content-type", "application/json")
            .body(body)
    }

    /// Convenience wrapper: writes a `text/plain` body.
    pub fn text<T: WriteBuffer>(resp: &mut Response, status: StatusCode, body: T) -> Handled {
        resp.status(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(body)
    }

    /// Convenience wrapper: writes a `text/html` body.
    pub fn html<T: WriteBuffer>(resp: &mut Response, status: StatusCode, body: T) -> Handled {
        resp.status(status)
            .header("content-type", "text/html; charset=utf-8")
            .body(body)
    }

    /// Convenience wrapper: a status-only response with no body.
    pub fn no_content(resp: &mut Response) -> Handled {
        resp.status(StatusCode::NoContent).body("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connection::HttpConnection;

    fn req(target: &str) -> Request {
        let raw = format!("GET {target} HTTP/1.1\r\n\r\n");
        let mut conn = HttpConnection::from_req(raw);
        conn.parse().expect("test request parses");
        conn.request
    }

    #[test]
    fn param_roundtrips_through_inline_slot() {
        let mut ctx = Context::new();
        ctx.push_param("id", b"42");
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param("missing"), None);
    }

    #[test]
    fn params_overflow_past_inline_capacity() {
        let mut ctx = Context::new();
        for i in 0..(PARAM_INLINE + 4) {
            let name: &'static str = Box::leak(format!("p{i}").into_boxed_str());
            ctx.push_param(name, format!("v{i}").as_bytes());
        }
        assert_eq!(ctx.param("p0"), Some("v0"));
        assert_eq!(ctx.param("p11"), Some("v11"));
    }

    #[test]
    fn reset_clears_params_and_values() {
        let mut ctx = Context::new();
        ctx.push_param("id", b"1");
        ctx.set("flag", true);
        ctx.reset();
        assert_eq!(ctx.param("id"), None);
        assert_eq!(ctx.get::<bool>("flag"), None);
    }

    #[test]
    fn query_lookup_parses_lazily_and_caches() {
        let mut ctx = Context::new();
        let r = req("/search?q=rust&limit=10");
        assert_eq!(ctx.query(&r, "q"), Some("rust"));
        assert_eq!(ctx.query(&r, "limit"), Some("10"));
        assert_eq!(ctx.query(&r, "missing"), None);
    }

    #[test]
    fn set_and_get_roundtrip_user_values() {
        let mut ctx = Context::new();
        ctx.set("count", 7i32);
        assert_eq!(ctx.get::<i32>("count"), Some(&7));
    }
}
