use crate::client::HttpClient;
use crate::context::RequestContext;
use crate::error::{HttpError, InvalidUriKind};
use crate::headers::parse_header;
use crate::response::{HttpResponse, ResponseHead};
use crate::transport::RequestBody;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Method, Request};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use url::Url;

/// Body type for the request builder
#[derive(Clone, Debug)]
enum BodyKind {
    /// Empty body
    Empty,
    /// Raw bytes body
    Bytes(Bytes),
    /// JSON-serialized body (stored as bytes after serialization)
    Json(Bytes),
    /// Form URL-encoded body (stored as bytes after serialization)
    Form(Bytes),
}

impl BodyKind {
    fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => Some("application/json"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Empty | Self::Bytes(_) => None,
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Bytes(b) | Self::Json(b) | Self::Form(b) => b,
        }
    }
}

/// Request accumulated while the builder is healthy.
#[derive(Debug)]
struct PendingRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: BodyKind,
    context: RequestContext,
}

impl PendingRequest {
    fn into_request(self) -> Result<Request<RequestBody>, HttpError> {
        let Self {
            method,
            url,
            mut headers,
            body,
            context,
        } = self;

        // A caller-supplied content-type wins over the one implied by the body
        if let Some(content_type) = body.content_type()
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        let uri: http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                url: url.to_string(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body.into_bytes()))?;
        *request.headers_mut() = headers;
        request.extensions_mut().insert(context);
        Ok(request)
    }
}

enum BuildState {
    Building(Box<PendingRequest>),
    /// First error captured; terminal
    Failed(HttpError),
}

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`], [`HttpClient::post`], etc.
///
/// The builder never fails mid-chain. The first invalid step (bad URL, header,
/// or unencodable body) is remembered, every later step becomes a no-op, and
/// [`send()`](RequestBuilder::send) returns that first error without touching
/// the network.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::builder()
///     .base_url("https://api.example.com/v1")
///     .build()?;
///
/// // GET https://api.example.com/v1/users?page=2&limit=10
/// let (users, head): (Vec<User>, _) = client
///     .get("/users")
///     .query("page", "2")
///     .query("limit", "10")
///     .as_json()
///     .await?;
///
/// // POST with JSON body
/// let resp = client
///     .post("/users")
///     .header("x-request-id", "123")
///     .json(&NewUser { name: "Alice" })
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    client: HttpClient,
    state: BuildState,
}

impl RequestBuilder {
    pub(crate) fn new(client: HttpClient, method: Method, url: Result<Url, HttpError>) -> Self {
        let state = match url {
            Ok(url) => BuildState::Building(Box::new(PendingRequest {
                method,
                url,
                headers: HeaderMap::new(),
                body: BodyKind::Empty,
                context: RequestContext::default(),
            })),
            Err(e) => BuildState::Failed(e),
        };
        Self { client, state }
    }

    pub(crate) fn failed(client: HttpClient, error: HttpError) -> Self {
        Self {
            client,
            state: BuildState::Failed(error),
        }
    }

    /// Apply `step` unless an earlier step already failed.
    fn update(mut self, step: impl FnOnce(&mut PendingRequest) -> Result<(), HttpError>) -> Self {
        if let BuildState::Building(pending) = &mut self.state
            && let Err(e) = step(pending)
        {
            self.state = BuildState::Failed(e);
        }
        self
    }

    /// Add a single header to the request
    ///
    /// Repeated names are kept as separate values.
    pub fn header(self, name: &str, value: &str) -> Self {
        self.update(|pending| {
            let (name, value) = parse_header(name, value)?;
            pending.headers.append(name, value);
            Ok(())
        })
    }

    /// Add multiple headers to the request
    ///
    /// # Example
    ///
    /// ```ignore
    /// let resp = client
    ///     .get("https://api.example.com")
    ///     .headers([("authorization", "Bearer token"), ("x-request-id", "abc123")])
    ///     .send()
    ///     .await?;
    /// ```
    pub fn headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.update(|pending| {
            for (name, value) in headers {
                let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
                pending.headers.append(name, value);
            }
            Ok(())
        })
    }

    /// Append one query parameter, keeping those already in the URL.
    pub fn query(self, key: &str, value: &str) -> Self {
        self.update(|pending| {
            pending.url.query_pairs_mut().append_pair(key, value);
            Ok(())
        })
    }

    /// Append query parameters from any serde-serializable value
    /// (struct, map, or slice of pairs).
    ///
    /// Fails the builder with `HttpError::FormEncode` if the value cannot be
    /// encoded as flat key/value pairs.
    pub fn query_pairs<T: Serialize + ?Sized>(self, params: &T) -> Self {
        self.update(|pending| {
            let encoded = serde_urlencoded::to_string(params)?;
            if encoded.is_empty() {
                return Ok(());
            }
            let merged = match pending.url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
                _ => encoded,
            };
            pending.url.set_query(Some(&merged));
            Ok(())
        })
    }

    /// Set request body as JSON
    ///
    /// Serializes the value using `serde_json` and sets Content-Type to
    /// application/json unless a Content-Type header was already provided.
    /// Replaces any previously set body.
    ///
    /// Fails the builder with `HttpError::Json` if serialization fails.
    ///
    /// # Example
    ///
    /// ```ignore
    /// #[derive(Serialize)]
    /// struct CreateUser { name: String }
    ///
    /// let resp = client
    ///     .post("https://api.example.com/users")
    ///     .json(&CreateUser { name: "Alice".into() })
    ///     .send()
    ///     .await?;
    /// ```
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        self.update(|pending| {
            let json_bytes = serde_json::to_vec(body)?;
            pending.body = BodyKind::Json(Bytes::from(json_bytes));
            Ok(())
        })
    }

    /// Set request body as form URL-encoded
    ///
    /// Sets Content-Type to application/x-www-form-urlencoded unless a
    /// Content-Type header was already provided. Replaces any previously set body.
    ///
    /// Fails the builder with `HttpError::FormEncode` if encoding fails.
    pub fn form<T: Serialize + ?Sized>(self, fields: &T) -> Self {
        self.update(|pending| {
            let form_string = serde_urlencoded::to_string(fields)?;
            pending.body = BodyKind::Form(Bytes::from(form_string));
            Ok(())
        })
    }

    /// Set request body as raw bytes
    pub fn body_bytes(self, body: impl Into<Bytes>) -> Self {
        self.update(|pending| {
            pending.body = BodyKind::Bytes(body.into());
            Ok(())
        })
    }

    /// Set request body as a string
    pub fn body_string(self, body: impl Into<String>) -> Self {
        self.update(|pending| {
            pending.body = BodyKind::Bytes(Bytes::from(body.into()));
            Ok(())
        })
    }

    /// Bound the request to finish within `timeout`, counted from this call.
    ///
    /// The bound covers reading the response body as well.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.update(|pending| {
            pending.context = std::mem::take(&mut pending.context).with_timeout(timeout);
            Ok(())
        })
    }

    /// Bound the request by an absolute deadline. The earliest deadline wins.
    pub fn deadline(self, deadline: tokio::time::Instant) -> Self {
        self.update(|pending| {
            pending.context = std::mem::take(&mut pending.context).with_deadline(deadline);
            Ok(())
        })
    }

    /// Abort the request when `token` is cancelled.
    pub fn cancel_on(self, token: CancellationToken) -> Self {
        self.update(|pending| {
            pending.context = std::mem::take(&mut pending.context).with_cancellation(token);
            Ok(())
        })
    }

    /// Replace the request's deadline and cancellation binding.
    pub fn context(self, context: RequestContext) -> Self {
        self.update(|pending| {
            pending.context = context;
            Ok(())
        })
    }

    /// Whether an earlier step failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.state, BuildState::Failed(_))
    }

    /// The first error captured by the chain, if any.
    #[must_use]
    pub fn error(&self) -> Option<&HttpError> {
        match &self.state {
            BuildState::Failed(e) => Some(e),
            BuildState::Building(_) => None,
        }
    }

    /// Send the request through the client's pipeline and return the response
    ///
    /// The pipeline is composed from the client's middleware list as it is
    /// now, so middleware registered after this builder was created still
    /// applies.
    ///
    /// Any HTTP status is a successful response; use
    /// [`HttpResponse::error_for_status`] to reject non-2xx.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if:
    /// - A builder step failed (the first such error, with no network call)
    /// - The transport failed, timed out, or was cancelled
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        let pending = match self.state {
            BuildState::Building(pending) => pending,
            BuildState::Failed(e) => return Err(e),
        };

        let request = pending.into_request()?;
        tracing::debug!(
            method = %request.method(),
            host = request.uri().host().unwrap_or_default(),
            path = request.uri().path(),
            "sending request"
        );

        let response = self.client.effective_transport().oneshot(request).await?;
        Ok(HttpResponse::new(response, self.client.max_body_size()))
    }

    /// Send the request and read the whole body.
    ///
    /// # Errors
    /// See [`send()`](Self::send) and [`HttpResponse::bytes`].
    pub async fn as_bytes(self) -> Result<(Bytes, ResponseHead), HttpError> {
        self.send().await?.bytes_with_head().await
    }

    /// Send the request and decode the body as JSON.
    ///
    /// # Errors
    /// See [`send()`](Self::send). A body that does not decode yields
    /// `HttpError::Decode`, which still carries the response head.
    pub async fn as_json<T: DeserializeOwned>(self) -> Result<(T, ResponseHead), HttpError> {
        self.send().await?.json_with_head().await
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("RequestBuilder");
        match &self.state {
            BuildState::Building(pending) => out
                .field("method", &pending.method)
                .field("url", &pending.url.as_str()),
            BuildState::Failed(e) => out.field("error", e),
        };
        out.finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::builder::HttpClientBuilder;
    use crate::config::HttpClientConfig;
    use crate::testing::{Echo, echo_transport};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fake_client() -> (HttpClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .transport(echo_transport(Arc::clone(&calls)))
            .build()
            .unwrap();
        (client, calls)
    }

    #[tokio::test]
    async fn test_headers_and_body_reach_transport() {
        let (client, calls) = fake_client();

        let (echo, head): (Echo, _) = client
            .post("http://fake.local/items")
            .header("x-trace", "a")
            .header("X-Trace", "b")
            .headers([("x-tenant", "acme")])
            .body_string("raw")
            .as_json()
            .await
            .unwrap();

        assert_eq!(head.status(), http::StatusCode::OK);
        assert_eq!(echo.method, "POST");
        assert_eq!(echo.url, "http://fake.local/items");
        assert_eq!(echo.header("x-trace"), vec!["a", "b"]);
        assert_eq!(echo.header("x-tenant"), vec!["acme"]);
        assert!(echo.header("content-type").is_empty());
        assert_eq!(echo.body, "raw");
        assert!(echo.has_context);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_error_is_sticky() {
        let (client, calls) = fake_client();

        let builder = client
            .get("http://fake.local/")
            .header("bad header", "v")
            // Later failures must not replace the first one
            .header("x-ok", "bad\nvalue")
            .json(&f64::NAN)
            .query("a", "b");

        assert!(builder.is_failed());
        assert!(matches!(builder.error(), Some(HttpError::InvalidHeaderName(_))));

        let result = builder.send().await;
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_json_encoding_failure_fails_builder() {
        use std::collections::BTreeMap;

        let (client, calls) = fake_client();
        // Non-string map keys cannot be encoded as JSON object keys
        let mut body = BTreeMap::new();
        body.insert(vec![1_u8], "value");

        let result = client.post("http://fake.local/").json(&body).as_bytes().await;

        assert!(matches!(result, Err(HttpError::Json(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_appends_to_existing_parameters() {
        let (client, _) = fake_client();

        #[derive(Serialize)]
        struct Page {
            page: u32,
            tags: &'static str,
        }

        let (echo, _): (Echo, _) = client
            .get("http://fake.local/search?q=rust")
            .query("q", "tokio")
            .query_pairs(&Page {
                page: 2,
                tags: "a b",
            })
            .as_json()
            .await
            .unwrap();

        assert_eq!(
            echo.url,
            "http://fake.local/search?q=rust&q=tokio&page=2&tags=a+b"
        );
    }

    #[tokio::test]
    async fn test_json_sets_content_type() {
        let (client, _) = fake_client();

        let (echo, _): (Echo, _) = client
            .post("http://fake.local/")
            .json(&serde_json::json!({"name": "Alice"}))
            .as_json()
            .await
            .unwrap();

        assert_eq!(echo.header("content-type"), vec!["application/json"]);
        assert_eq!(echo.body, r#"{"name":"Alice"}"#);
    }

    #[tokio::test]
    async fn test_json_round_trips_through_echoing_endpoint() {
        use crate::response::response_body;
        use crate::transport::transport_fn;
        use http_body_util::BodyExt;

        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Order {
            id: u64,
            items: Vec<String>,
            note: Option<String>,
        }

        // Answers with the request body and content type unchanged
        let transport = transport_fn(|req: Request<RequestBody>| async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await?.to_bytes();
            let mut response = http::Response::new(response_body(body));
            if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, content_type.clone());
            }
            Ok::<_, HttpError>(response)
        });
        let client = HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .transport(transport)
            .build()
            .unwrap();

        let order = Order {
            id: 7,
            items: vec!["tea".to_owned(), "scone".to_owned()],
            note: None,
        };
        let (echoed, head): (Order, _) = client
            .post("http://fake.local/orders")
            .json(&order)
            .as_json()
            .await
            .unwrap();

        assert_eq!(echoed, order);
        assert_eq!(head.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_explicit_content_type_is_kept() {
        let (client, _) = fake_client();

        let (echo, _): (Echo, _) = client
            .post("http://fake.local/")
            .header("content-type", "application/vnd.api+json")
            .json(&serde_json::json!({"a": 1}))
            .as_json()
            .await
            .unwrap();

        assert_eq!(echo.header("content-type"), vec!["application/vnd.api+json"]);
    }

    #[tokio::test]
    async fn test_last_body_wins() {
        let (client, _) = fake_client();

        let (echo, _): (Echo, _) = client
            .post("http://fake.local/")
            .json(&serde_json::json!({"ignored": true}))
            .form(&[("grant_type", "client_credentials"), ("scope", "a b")])
            .as_json()
            .await
            .unwrap();

        assert_eq!(
            echo.header("content-type"),
            vec!["application/x-www-form-urlencoded"]
        );
        assert_eq!(echo.body, "grant_type=client_credentials&scope=a+b");
    }

    #[tokio::test]
    async fn test_context_travels_to_transport() {
        let token = CancellationToken::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));

        let seen_in_transport = Arc::clone(&seen);
        let transport = crate::transport_fn(move |req: Request<RequestBody>| {
            let seen = Arc::clone(&seen_in_transport);
            async move {
                *seen.lock() = RequestContext::of(&req).cloned();
                Ok(http::Response::new(crate::response_body("")))
            }
        });
        let client = HttpClient::builder().transport(transport).build().unwrap();

        client
            .get("http://fake.local/")
            .timeout(Duration::from_secs(30))
            .cancel_on(token.clone())
            .send()
            .await
            .unwrap();

        let context = seen.lock().take().unwrap();
        assert!(context.deadline().is_some());
        assert!(!context.is_cancelled());
        token.cancel();
        assert!(context.is_cancelled());
    }

    #[test]
    fn test_debug_shows_target_or_error() {
        let (client, _) = fake_client();

        let ok = format!("{:?}", client.get("http://fake.local/x"));
        assert!(ok.contains("http://fake.local/x"));

        let failed = format!("{:?}", client.get("http://fake.local/").header("bad header", "v"));
        assert!(failed.contains("error"));
    }
}
