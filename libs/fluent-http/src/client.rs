use crate::builder::HttpClientBuilder;
use crate::error::{HttpError, InvalidUriKind};
use crate::headers::HeaderStore;
use crate::middleware::{Middleware, MiddlewareChain, from_layer};
use crate::request::RequestBuilder;
use crate::transport::Transport;
use http::Method;
use std::sync::Arc;
use url::Url;

/// HTTP client with a shared middleware pipeline
///
/// Every request built from a client runs through the same pipeline:
///
/// ```text
/// DefaultHeadersLayer → [TracingLayer?] → user middleware (registration order) → transport
/// ```
///
/// The pipeline is composed per request from the middleware list as it is at
/// send time, so middleware registered later still applies to builders created
/// earlier.
///
/// Use [`HttpClientBuilder`] to construct instances with custom configuration.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync`. Cloning is cheap (one `Arc`) and all
/// clones share the default headers and middleware list. Callers do NOT need
/// to wrap it in `Mutex` or `Arc<Mutex<_>>`.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::builder()
///     .base_url("https://api.example.com/v1")
///     .header("accept", "application/json")
///     .build()?;
///
/// let (user, _head): (User, _) = client.get("/users/42").as_json().await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Option<Url>,
    headers: Arc<HeaderStore>,
    middlewares: MiddlewareChain,
    transport: Transport,
    max_body_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Create a builder for configuring the HTTP client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub(crate) fn from_parts(
        base_url: Option<Url>,
        headers: Arc<HeaderStore>,
        middlewares: MiddlewareChain,
        transport: Transport,
        max_body_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                base_url,
                headers,
                middlewares,
                transport,
                max_body_size,
            }),
        }
    }

    /// Base URL relative request targets are resolved against.
    #[must_use]
    pub fn base_url(&self) -> Option<&Url> {
        self.inner.base_url.as_ref()
    }

    /// Default headers applied to every request.
    ///
    /// Changes are visible to every clone of the client and take effect for
    /// the next request sent.
    #[must_use]
    pub fn headers(&self) -> &HeaderStore {
        &self.inner.headers
    }

    /// Append a default header value.
    ///
    /// # Errors
    /// Returns `InvalidHeaderName` / `InvalidHeaderValue` for malformed input.
    pub fn with_header(&self, name: &str, value: &str) -> Result<&Self, HttpError> {
        self.inner.headers.add(name, value)?;
        Ok(self)
    }

    /// Register `middleware` after every middleware already registered.
    ///
    /// Requests already in flight keep the pipeline they started with.
    pub fn with_middleware(&self, middleware: impl Middleware) -> &Self {
        self.inner.middlewares.push(Arc::new(middleware));
        self
    }

    /// Register a tower layer as middleware, see [`from_layer`].
    pub fn with_layer<L>(&self, layer: L) -> &Self
    where
        crate::middleware::LayerMiddleware<L>: Middleware,
    {
        self.with_middleware(from_layer(layer))
    }

    /// Number of registered middlewares, including the built-in ones.
    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.inner.middlewares.len()
    }

    /// Create a request builder for any method.
    ///
    /// `url` is either absolute (`http`/`https`) or relative to the client's
    /// base URL. The base URL is treated as a directory and leading slashes of
    /// `url` are ignored, so with base `https://host/api`:
    ///
    /// - `/users` and `users` resolve to `https://host/api/users`
    /// - `../v2/users` resolves to `https://host/v2/users`
    /// - `https://other.host/x` is used as is
    /// - `//other.host/x` is a network-path reference and resolves to
    ///   `https://other.host/x`, taking only the scheme from the base
    ///
    /// Invalid methods or URLs do not panic; the returned builder is already
    /// failed and `send()` reports the error.
    pub fn request<M>(&self, method: M, url: &str) -> RequestBuilder
    where
        M: TryInto<Method>,
        M::Error: Into<HttpError>,
    {
        match method.try_into() {
            Ok(method) => RequestBuilder::new(self.clone(), method, self.resolve_url(url)),
            Err(e) => RequestBuilder::failed(self.clone(), e.into()),
        }
    }

    /// Create a GET request builder
    ///
    /// # Example
    ///
    /// ```ignore
    /// let resp = client.get("https://api.example.com/data").send().await?;
    /// ```
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder
    ///
    /// Set the body on the returned builder:
    ///
    /// ```ignore
    /// let resp = client
    ///     .post("https://auth.example.com/token")
    ///     .form(&[("grant_type", "client_credentials")])
    ///     .send()
    ///     .await?;
    /// ```
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder
    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH request builder
    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE request builder
    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Create a HEAD request builder
    pub fn head(&self, url: &str) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Transport with the current middleware list applied, first registered outermost.
    pub(crate) fn effective_transport(&self) -> Transport {
        let middlewares = &self.inner.middlewares;
        tracing::trace!(middlewares = middlewares.len(), "composing request pipeline");
        middlewares.compose(self.inner.transport.clone())
    }

    pub(crate) fn max_body_size(&self) -> usize {
        self.inner.max_body_size
    }

    fn resolve_url(&self, raw: &str) -> Result<Url, HttpError> {
        resolve_url(self.inner.base_url.as_ref(), raw)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("middlewares", &self.inner.middlewares.len())
            .field("max_body_size", &self.inner.max_body_size)
            .finish_non_exhaustive()
    }
}

/// Resolve `raw` against an optional base URL, see [`HttpClient::request`].
pub(crate) fn resolve_url(base: Option<&Url>, raw: &str) -> Result<Url, HttpError> {
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(base) = base else {
                return Err(HttpError::InvalidUri {
                    url: raw.to_owned(),
                    kind: InvalidUriKind::MissingBase,
                    reason: "relative URL given to a client without a base URL".to_owned(),
                });
            };
            let joined = if raw.starts_with("//") {
                // Network-path reference: keeps only the base's scheme
                base.join(raw)
            } else {
                directory_base(base).join(raw.trim_start_matches('/'))
            };
            joined.map_err(|e| parse_error(raw, &e))?
        }
        Err(e) => return Err(parse_error(raw, &e)),
    };

    check_scheme(url)
}

/// Reject anything but `http` and `https`.
pub(crate) fn check_scheme(url: Url) -> Result<Url, HttpError> {
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(HttpError::InvalidUri {
            url: url.to_string(),
            kind: InvalidUriKind::UnsupportedScheme,
            reason: format!("scheme '{other}' is not supported, use http or https"),
        }),
    }
}

/// `base` with a trailing slash so joins append to its last segment.
fn directory_base(base: &Url) -> Url {
    let mut dir = base.clone();
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}

fn parse_error(raw: &str, err: &url::ParseError) -> HttpError {
    HttpError::InvalidUri {
        url: raw.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: err.to_string(),
    }
}
