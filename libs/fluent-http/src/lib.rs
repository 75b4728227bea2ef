#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Fluent HTTP client with a composable middleware pipeline
//!
//! This crate provides a hyper-based HTTP client with:
//! - A chainable request builder that defers the first error to `send()`
//! - Base URL resolution for relative request targets
//! - Default headers shared by every request, safe to change at runtime
//! - An ordered middleware pipeline (closures, tower layers, async functions)
//! - Per-request deadlines and cancellation
//! - Automatic TLS via rustls and connection pooling
//! - **Transparent response decompression** (gzip, brotli, deflate)
//! - Optional request tracing spans
//!
//! # Pipeline
//!
//! Each request passes through the client's middleware in registration order
//! and reaches the transport last. Default headers are applied by the first,
//! built-in middleware, so every later middleware sees them. The pipeline is
//! composed at send time from the current middleware list.
//!
//! # Example
//!
//! ```ignore
//! use fluent_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .base_url("https://api.example.com/v1")
//!     .user_agent("my-app/1.0")
//!     .bearer_auth(token)
//!     .build()?;
//!
//! client.headers().set("accept", "application/json")?;
//!
//! // GET https://api.example.com/v1/users?active=true
//! let (users, head): (Vec<User>, _) = client
//!     .get("/users")
//!     .query("active", "true")
//!     .timeout(Duration::from_secs(5))
//!     .as_json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod context;
mod error;
mod headers;
mod layers;
mod middleware;
mod request;
mod response;
#[cfg(test)]
mod testing;
mod tls;
mod transport;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT, DefaultHeaderPolicy, HttpClientConfig,
    TlsRootConfig,
};
pub use context::RequestContext;
pub use error::{ErrorKind, HttpError, InvalidUriKind};
pub use headers::HeaderStore;
pub use layers::{
    BearerAuthLayer, BearerAuthService, DefaultHeadersLayer, DefaultHeadersService, TracingLayer,
    TracingService,
};
pub use middleware::{
    FnMiddleware, LayerMiddleware, Middleware, MiddlewareChain, Next, from_fn, from_layer,
};
pub use request::RequestBuilder;
pub use response::{HttpResponse, LimitedBody, ResponseBody, ResponseHead, response_body};
pub use transport::{HyperTransport, RequestBody, Transport, TransportFuture, transport_fn};

pub use tokio_util::sync::CancellationToken;
pub use url::Url;
