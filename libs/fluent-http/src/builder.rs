use crate::client::{HttpClient, check_scheme};
use crate::config::{DefaultHeaderPolicy, HttpClientConfig, TlsRootConfig};
use crate::error::{HttpError, InvalidUriKind};
use crate::headers::{HeaderStore, parse_header};
use crate::layers::{BearerAuthLayer, DefaultHeadersLayer, TracingLayer};
use crate::middleware::{LayerMiddleware, Middleware, MiddlewareChain, from_layer};
use crate::transport::{HyperTransport, Transport};
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Builder for constructing an [`HttpClient`].
///
/// Errors from individual steps (bad header, bad base URL) are kept and
/// returned by [`build()`](Self::build), so the chain itself never fails.
///
/// # Middleware order
///
/// The resulting pipeline, outermost first:
///
/// 1. default headers (always present)
/// 2. request tracing (if [`with_tracing`](Self::with_tracing) or `config.tracing`)
/// 3. middleware added via [`middleware`](Self::middleware), [`layer`](Self::layer)
///    and [`bearer_auth`](Self::bearer_auth), in call order
/// 4. the transport ([`HyperTransport`] unless [`transport`](Self::transport) is set)
#[must_use]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    headers: Vec<(HeaderName, HeaderValue)>,
    middlewares: Vec<Arc<dyn Middleware>>,
    transport: Option<Transport>,
    error: Option<HttpError>,
}

impl HttpClientBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a builder with a specific configuration
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            headers: Vec::new(),
            middlewares: Vec::new(),
            transport: None,
            error: None,
        }
    }

    fn fail(mut self, error: HttpError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    /// Set the base URL relative request targets resolve against
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    /// Add a default header sent with every request
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match parse_header(name, value) {
            Ok(pair) => {
                self.headers.push(pair);
                self
            }
            Err(e) => self.fail(e),
        }
    }

    /// Set the User-Agent seeded into the default headers
    ///
    /// Ignored when a `user-agent` default header is added explicitly.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Set the client-wide timeout applied by the default transport
    ///
    /// Per-request deadlines via [`RequestBuilder::timeout`](crate::RequestBuilder::timeout)
    /// apply in addition; whichever expires first wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Set the maximum response body size in bytes
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Select the root certificates used by the default transport
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Choose how default headers combine with per-request headers
    pub fn default_header_policy(mut self, policy: DefaultHeaderPolicy) -> Self {
        self.config.default_header_policy = policy;
        self
    }

    /// Record every request in an `outgoing_http` tracing span
    pub fn with_tracing(mut self) -> Self {
        self.config.tracing = true;
        self
    }

    /// Append a middleware to the pipeline
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append a tower layer to the pipeline, see [`from_layer`]
    pub fn layer<L>(self, layer: L) -> Self
    where
        LayerMiddleware<L>: Middleware,
    {
        self.middleware(from_layer(layer))
    }

    /// Send `Authorization: Bearer <token>` on requests that carry no
    /// authorization header of their own
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        match BearerAuthLayer::try_new(token) {
            Ok(layer) => self.layer(layer),
            Err(e) => self.fail(e),
        }
    }

    /// Replace the default hyper transport
    ///
    /// The client-wide timeout and TLS settings only apply to the default
    /// transport; a custom one is used exactly as given.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns the first error recorded by a builder step,
    /// `HttpError::InvalidUri` for a bad base URL, `HttpError::InvalidHeaderValue`
    /// for a bad user agent, or `HttpError::Tls` if the default transport
    /// cannot load its roots.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let base_url = self
            .config
            .base_url
            .as_deref()
            .map(parse_base_url)
            .transpose()?;

        let store = Arc::new(HeaderStore::new());
        for (name, value) in self.headers {
            store.append_parsed(name, value);
        }
        if let Some(user_agent) = &self.config.user_agent
            && !store.contains(USER_AGENT.as_str())
        {
            store.append_parsed(USER_AGENT, HeaderValue::try_from(user_agent.as_str())?);
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => HyperTransport::new(&self.config)?.into_transport(),
        };

        let chain = MiddlewareChain::new();
        chain.push(Arc::new(from_layer(DefaultHeadersLayer::new(
            Arc::clone(&store),
            self.config.default_header_policy,
        ))));
        if self.config.tracing {
            chain.push(Arc::new(from_layer(TracingLayer::new())));
        }
        for middleware in self.middlewares {
            chain.push(middleware);
        }

        tracing::debug!(
            base_url = base_url.as_ref().map(Url::as_str),
            middlewares = chain.len(),
            tracing = self.config.tracing,
            "http client built"
        );

        Ok(HttpClient::from_parts(
            base_url,
            store,
            chain,
            transport,
            self.config.max_body_size,
        ))
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_base_url(raw: &str) -> Result<Url, HttpError> {
    let url = Url::parse(raw).map_err(|e| HttpError::InvalidUri {
        url: raw.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: format!("invalid base URL: {e}"),
    })?;
    check_scheme(url)
}
