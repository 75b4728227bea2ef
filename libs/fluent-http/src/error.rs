use crate::response::ResponseHead;
use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// Relative URL given to a client that has no base URL
    MissingBase,
    /// Scheme other than `http` or `https`
    UnsupportedScheme,
}

/// Coarse error taxonomy used to tell configuration mistakes apart from
/// network failures and body decoding problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad URL, method or header; captured before any I/O happens
    Construction,
    /// Request payload could not be serialized
    Encoding,
    /// Network, TLS, timeout or cancellation failure from the transport
    Transport,
    /// Response body is not valid JSON for the requested shape
    Decoding,
    /// Non-2xx status surfaced by [`HttpResponse::error_for_status`](crate::HttpResponse::error_for_status)
    Status,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed (invalid method, URI conversion, etc.)
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Method token is not a valid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse or resolve
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// JSON request body serialization failed
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Transport error (network, connection, TLS handshake, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS initialization failed (root certificates, crypto provider)
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Client-wide request timeout elapsed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Deadline bound to the request via [`RequestContext`](crate::RequestContext) passed
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Cancellation token bound to the request fired
    #[error("Request cancelled")]
    Cancelled,

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status
    #[error("HTTP {status}")]
    HttpStatus {
        status: http::StatusCode,
        content_type: Option<String>,
    },

    /// Response body could not be decoded as JSON.
    ///
    /// The body was fully read and released; `head` keeps the status and
    /// headers so callers can still inspect what the server sent.
    #[error("JSON decoding failed: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        head: Box<ResponseHead>,
    },
}

impl HttpError {
    /// Classify the error into the client's error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestBuild(_)
            | Self::InvalidMethod(_)
            | Self::InvalidHeaderName(_)
            | Self::InvalidHeaderValue(_)
            | Self::InvalidUri { .. } => ErrorKind::Construction,
            Self::Json(_) | Self::FormEncode(_) => ErrorKind::Encoding,
            Self::Transport(_)
            | Self::Tls(_)
            | Self::Timeout(_)
            | Self::DeadlineExceeded
            | Self::Cancelled
            | Self::BodyTooLarge { .. } => ErrorKind::Transport,
            Self::HttpStatus { .. } => ErrorKind::Status,
            Self::Decode { .. } => ErrorKind::Decoding,
        }
    }

    /// Response head attached to a decoding failure, if any.
    #[must_use]
    pub fn response_head(&self) -> Option<&ResponseHead> {
        match self {
            Self::Decode { head, .. } => Some(head),
            _ => None,
        }
    }
}

impl From<std::convert::Infallible> for HttpError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
