use crate::{query, Version};
use std::{error, fmt, io};

/// Fatal, connection-ending errors raised while reading or parsing one
/// HTTP/1.1 message off the wire.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,
    UnsupportedTransfer,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;
        UnsupportedTransfer: "400 Bad Request", "64"
            => r#"{"error":"Unsupported Transfer-Encoding","code":"UNSUPPORTED_TRANSFER"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Sentinel errors surfaced above the wire layer: route dispatch, handler
/// logic, and the cache engine all report failures through this single set
/// rather than inventing a new enum per subsystem.
///
/// Router dispatch produces [`NotFound`](HandlerError::NotFound) on a
/// miss; everything else is available for handlers and middleware to
/// return to signal a condition the default error handler should render.
/// The cache engine only ever produces
/// [`NotFound`](HandlerError::NotFound), [`Closed`](HandlerError::Closed),
/// [`EvictionFailed`](HandlerError::EvictionFailed), and
/// [`Canceled`](HandlerError::Canceled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandlerError {
    /// No route (or cache entry) matched.
    NotFound,
    /// The cache has been closed via [`Cache::close`](crate::cache::Cache::close).
    Closed,
    /// A `Set` could not make room under the configured eviction mode.
    EvictionFailed,
    /// The operation observed a canceled [`CancelToken`](crate::cache::CancelToken)
    /// before taking the lock.
    Canceled,

    /// The request could not be understood by the handler.
    BadRequest,
    /// The request lacks valid authentication.
    Unauthorized,
    /// The request is authenticated but not permitted.
    Forbidden,
    /// The request conflicts with the current state of the resource.
    Conflict,
    /// The caller has exceeded a rate limit.
    TooManyRequests,
    /// The handler gave up waiting on a dependency.
    RequestTimeout,
    /// A handler tried to write headers after the response was already
    /// finalized; always a bug in handler code, never a client condition.
    HeadersAlreadySent,
}

impl HandlerError {
    /// Maps the error to the status code the default error handler renders.
    pub const fn status_code(self) -> crate::http::types::StatusCode {
        use crate::http::types::StatusCode;

        match self {
            Self::NotFound => StatusCode::NotFound,
            Self::Closed => StatusCode::ServiceUnavailable,
            Self::EvictionFailed => StatusCode::InsufficientStorage,
            Self::Canceled => StatusCode::ServiceUnavailable,
            Self::BadRequest => StatusCode::BadRequest,
            Self::Unauthorized => StatusCode::Unauthorized,
            Self::Forbidden => StatusCode::Forbidden,
            Self::Conflict => StatusCode::Conflict,
            Self::TooManyRequests => StatusCode::TooManyRequests,
            Self::RequestTimeout => StatusCode::RequestTimeout,
            Self::HeadersAlreadySent => StatusCode::InternalServerError,
        }
    }

    /// Short machine-readable code, used as the default JSON error body's
    /// `"code"` field.
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Closed => "CLOSED",
            Self::EvictionFailed => "EVICTION_FAILED",
            Self::Canceled => "CANCELED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::HeadersAlreadySent => "HEADERS_ALREADY_SENT",
        }
    }

    /// Human-readable message, used as the default JSON error body's
    /// `"error"` field.
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::Closed => "closed",
            Self::EvictionFailed => "eviction failed",
            Self::Canceled => "canceled",
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::TooManyRequests => "too many requests",
            Self::RequestTimeout => "request timeout",
            Self::HeadersAlreadySent => "headers already sent",
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl error::Error for HandlerError {}

#[cfg(test)]
mod handler_error_tests {
    use super::*;

    #[test]
    fn status_codes_cover_every_variant() {
        let all = [
            HandlerError::NotFound,
            HandlerError::Closed,
            HandlerError::EvictionFailed,
            HandlerError::Canceled,
            HandlerError::BadRequest,
            HandlerError::Unauthorized,
            HandlerError::Forbidden,
            HandlerError::Conflict,
            HandlerError::TooManyRequests,
            HandlerError::RequestTimeout,
            HandlerError::HeadersAlreadySent,
        ];

        for err in all {
            assert!(!err.code().is_empty());
            assert!(!err.message().is_empty());
            let _ = err.status_code();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_differ_by_version() {
        let err = ErrorKind::InvalidMethod;
        let v11 = err.as_http(Version::Http11, false);
        let v10 = err.as_http(Version::Http10, false);
        assert!(v11.starts_with(b"HTTP/1.1 400"));
        assert!(v10.starts_with(b"HTTP/1.0 400"));
    }

    #[test]
    fn wire_bytes_json_flag() {
        let err = ErrorKind::BodyTooLarge;
        let json = err.as_http(Version::Http11, true);
        let plain = err.as_http(Version::Http11, false);
        assert!(json.ends_with(b"}"));
        assert!(plain.ends_with(b"\r\n\r\n"));
    }
}
