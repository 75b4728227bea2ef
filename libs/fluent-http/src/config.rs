use serde::Deserialize;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("fluent-http/", env!("CARGO_PKG_VERSION"));

/// Default maximum response body size (10 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// How client default headers combine with headers set on a single request.
///
/// Default headers are applied by the outermost middleware, after the request
/// builder has already placed its own headers on the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DefaultHeaderPolicy {
    /// Append default values after the request's own values; both are sent.
    #[default]
    Append,
    /// Skip a default header when the request already carries that name.
    PreferRequest,
    /// Replace the request's values with the default ones.
    PreferDefault,
}

/// HTTP client configuration
///
/// Deserializable so hosts can embed it in their own config files:
///
/// ```yaml
/// http:
///   base_url: "https://api.example.com/v1"
///   request_timeout: "15s"
///   default_header_policy: prefer_request
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Base URL used to resolve relative request targets
    pub base_url: Option<String>,

    /// User-Agent seeded into the default headers (skipped if a default
    /// `user-agent` header is configured explicitly)
    pub user_agent: Option<String>,

    /// Client-wide timeout applied by the default transport to each request
    #[serde(with = "humantime_opt")]
    pub request_timeout: Option<Duration>,

    /// Maximum response body size in bytes, applied when buffering bodies
    pub max_body_size: usize,

    /// Root certificates used by the default transport
    pub tls_roots: TlsRootConfig,

    /// Precedence between default headers and per-request headers
    pub default_header_policy: DefaultHeaderPolicy,

    /// Register the request tracing middleware
    pub tracing: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: Some(DEFAULT_USER_AGENT.to_owned()),
            request_timeout: Some(Duration::from_secs(30)),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            tls_roots: TlsRootConfig::default(),
            default_header_policy: DefaultHeaderPolicy::default(),
            tracing: false,
        }
    }
}

impl HttpClientConfig {
    /// Create minimal configuration (no user agent, short timeout, 1 MB bodies)
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            user_agent: None,
            request_timeout: Some(Duration::from_secs(10)),
            max_body_size: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Configuration for tests against local mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            user_agent: None,
            request_timeout: Some(Duration::from_secs(5)),
            ..Self::default()
        }
    }
}

/// Serde adapter for `Option<Duration>` written as humantime strings ("250ms", "1m 30s").
mod humantime_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
