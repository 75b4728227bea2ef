//! Tower layers used as client middleware
//!
//! Each layer is generic over the inner service, so it works both inside the
//! client pipeline (via [`from_layer`](crate::from_layer)) and in any other
//! tower stack.
//!
//! ## Available Layers
//!
//! - [`DefaultHeadersLayer`] - Copies the client's shared default headers onto each request
//! - [`TracingLayer`] - Wraps each request in an `outgoing_http` span
//! - [`BearerAuthLayer`] - Adds a fixed `Authorization: Bearer` header

mod bearer;
mod default_headers;
mod trace;

pub use bearer::{BearerAuthLayer, BearerAuthService};
pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use trace::{TracingLayer, TracingService};
