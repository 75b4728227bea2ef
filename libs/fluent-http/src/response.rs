use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Version};
use http_body::{Body, Frame};
use http_body_util::{BodyExt, Full};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Type alias for the boxed response body produced by every transport.
///
/// The body is type-erased so middleware and fake transports can produce it
/// without knowing what the default transport does (decompression etc.).
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Build a [`ResponseBody`] from in-memory bytes.
///
/// Handy for fake transports and middleware that short-circuit the pipeline.
pub fn response_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// Status line and headers of a response whose body has already been consumed.
#[derive(Debug)]
pub struct ResponseHead {
    parts: http::response::Parts,
}

impl ResponseHead {
    pub(crate) fn new(parts: http::response::Parts) -> Self {
        Self { parts }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.parts.version
    }

    #[must_use]
    pub fn into_parts(self) -> http::response::Parts {
        self.parts
    }
}

pin_project! {
    /// Body wrapper that enforces size limits during streaming.
    ///
    /// Created by [`HttpResponse::into_limited_body()`]. Tracks bytes read
    /// and returns [`HttpError::BodyTooLarge`] if the limit is exceeded.
    pub struct LimitedBody {
        #[pin]
        inner: ResponseBody,
        limit: usize,
        read: usize,
    }
}

impl LimitedBody {
    /// Creates a new `LimitedBody` wrapping the given body with the specified limit.
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Returns the number of bytes read so far.
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    /// Returns the configured size limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Body for LimitedBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.read += data.len();
                    if *this.read > *this.limit {
                        return Poll::Ready(Some(Err(HttpError::BodyTooLarge {
                            limit: *this.limit,
                            actual: *this.read,
                        })));
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(body_error(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// HTTP response with a still-unread body.
///
/// The body is owned by this value; dropping it (or any of the consuming
/// readers below, on success or failure) releases the underlying stream
/// exactly once.
///
/// - `resp.bytes().await?` - read raw bytes
/// - `resp.json::<T>().await?` - read and decode JSON
/// - `resp.error_for_status()?` - turn non-2xx into an error without reading
///
/// All body reads enforce the configured `max_body_size` limit.
#[derive(Debug)]
pub struct HttpResponse {
    inner: Response<ResponseBody>,
    max_body_size: usize,
}

impl HttpResponse {
    pub(crate) fn new(inner: Response<ResponseBody>, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
        }
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Consume the wrapper and return the inner response with boxed body
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Check status and return error for non-2xx responses
    ///
    /// Does NOT read the response body; for non-2xx the body is dropped.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` if the response status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }

        let content_type = self
            .inner
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            content_type,
        })
    }

    /// Read the full body as bytes (no status check).
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if body exceeds limit,
    /// `Cancelled` / `DeadlineExceeded` / `Timeout` if the request's bounds
    /// fire mid-read, or `HttpError::Transport` if the stream fails.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        let (bytes, _head) = self.bytes_with_head().await?;
        Ok(bytes)
    }

    /// Read the full body and keep the status line and headers.
    ///
    /// # Errors
    /// Same as [`bytes()`](Self::bytes).
    pub async fn bytes_with_head(self) -> Result<(Bytes, ResponseHead), HttpError> {
        let (parts, body) = self.inner.into_parts();
        let bytes = read_body_limited(body, self.max_body_size).await?;
        Ok((bytes, ResponseHead::new(parts)))
    }

    /// Read the full body and decode it as JSON (no status check).
    ///
    /// # Errors
    /// Body read errors as in [`bytes()`](Self::bytes); a body that does not
    /// decode yields `HttpError::Decode` carrying the response head.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let (value, _head) = self.json_with_head().await?;
        Ok(value)
    }

    /// Like [`json()`](Self::json) but also returns the response head.
    ///
    /// # Errors
    /// See [`json()`](Self::json).
    pub async fn json_with_head<T: DeserializeOwned>(self) -> Result<(T, ResponseHead), HttpError> {
        let (bytes, head) = self.bytes_with_head().await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok((value, head)),
            Err(source) => Err(HttpError::Decode {
                source,
                head: Box::new(head),
            }),
        }
    }

    /// Read response body as text (UTF-8, lossy).
    ///
    /// # Errors
    /// See [`bytes()`](Self::bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let body_bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Returns the response body as a stream, without any size limit.
    ///
    /// Prefer [`into_limited_body()`](Self::into_limited_body) for untrusted peers.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// Returns the response body as a size-limited stream.
    ///
    /// When the limit is exceeded, the next `poll_frame()` call returns
    /// `HttpError::BodyTooLarge`.
    #[must_use]
    pub fn into_limited_body(self) -> LimitedBody {
        LimitedBody::new(self.inner.into_body(), self.max_body_size)
    }

    /// Returns the configured max body size for this response.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

/// Recover an [`HttpError`] raised inside the body stream (deadline,
/// cancellation, timeout); anything else is a transport failure.
fn body_error(err: Box<dyn std::error::Error + Send + Sync>) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(err) => *err,
        Err(err) => HttpError::Transport(err),
    }
}

/// Read the whole body, failing once more than `limit` bytes arrive.
///
/// The body is dropped on every return path, which releases the stream.
async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(body_error)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(status: u16, body: &'static str, limit: usize) -> HttpResponse {
        let inner = Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(response_body(body))
            .unwrap();
        HttpResponse::new(inner, limit)
    }

    /// Body that counts how many times it is dropped.
    struct DropCounter {
        drops: Arc<AtomicUsize>,
        chunk: Option<Bytes>,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl http_body::Body for DropCounter {
        type Data = Bytes;
        type Error = Box<dyn std::error::Error + Send + Sync>;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.chunk.take().map(|c| Ok(Frame::data(c))))
        }
    }

    #[tokio::test]
    async fn test_bytes_reads_full_body() {
        let body = response(200, "hello world", 1024).bytes().await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_bytes_enforces_limit() {
        let result = response(200, "0123456789", 4).bytes().await;
        assert!(matches!(
            result,
            Err(HttpError::BodyTooLarge { limit: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_json_decode_failure_keeps_head() {
        let err = response(502, "<html>bad gateway</html>", 1024)
            .json::<serde_json::Value>()
            .await
            .unwrap_err();

        let head = err.response_head().expect("decode error should carry the head");
        assert_eq!(head.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            head.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_json_with_head() {
        let (value, head) = response(200, r#"{"drink":"coffee"}"#, 1024)
            .json_with_head::<serde_json::Value>()
            .await
            .unwrap();
        assert_eq!(value["drink"], "coffee");
        assert_eq!(head.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_for_status() {
        assert!(response(204, "", 16).error_for_status().is_ok());

        match response(404, "", 16).error_for_status() {
            Err(HttpError::HttpStatus {
                status,
                content_type,
            }) => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_body_released_once_on_decode_failure() {
        let drops = Arc::new(AtomicUsize::new(0));
        let body = DropCounter {
            drops: Arc::clone(&drops),
            chunk: Some(Bytes::from_static(b"not json")),
        }
        .boxed();
        let resp = HttpResponse::new(Response::new(body), 1024);

        let result = resp.json::<serde_json::Value>().await;

        assert!(matches!(result, Err(HttpError::Decode { .. })));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_released_once_on_limit_failure() {
        let drops = Arc::new(AtomicUsize::new(0));
        let body = DropCounter {
            drops: Arc::clone(&drops),
            chunk: Some(Bytes::from_static(b"far too long")),
        }
        .boxed();
        let resp = HttpResponse::new(Response::new(body), 2);

        assert!(resp.bytes().await.is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    /// Body whose first frame is an error.
    struct FailingBody(Option<Box<dyn std::error::Error + Send + Sync>>);

    impl http_body::Body for FailingBody {
        type Data = Bytes;
        type Error = Box<dyn std::error::Error + Send + Sync>;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.0.take().map(Err))
        }
    }

    #[tokio::test]
    async fn test_body_stream_error_keeps_its_kind() {
        let body = FailingBody(Some(Box::new(HttpError::DeadlineExceeded))).boxed();
        let result = HttpResponse::new(Response::new(body), 1024).bytes().await;
        assert!(matches!(result, Err(HttpError::DeadlineExceeded)));

        let body = FailingBody(Some("connection reset".into())).boxed();
        let result = HttpResponse::new(Response::new(body), 1024).bytes().await;
        assert!(matches!(result, Err(HttpError::Transport(_))));

        let body = FailingBody(Some(Box::new(HttpError::Cancelled))).boxed();
        let mut limited = LimitedBody::new(body, 1024);
        assert!(matches!(limited.frame().await, Some(Err(HttpError::Cancelled))));
    }

    #[tokio::test]
    async fn test_limited_body_streaming() {
        let mut body = response(200, "abcdef", 3).into_limited_body();
        let frame = body.frame().await.unwrap();
        assert!(matches!(frame, Err(HttpError::BodyTooLarge { actual: 6, .. })));
    }
}
