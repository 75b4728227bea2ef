use crate::error::HttpError;
use http::{HeaderValue, Request, header::AUTHORIZATION};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that adds a fixed bearer token to requests without an
/// `Authorization` header.
///
/// The header value is marked sensitive so it is redacted from `Debug` output.
#[derive(Clone)]
pub struct BearerAuthLayer {
    value: HeaderValue,
}

impl BearerAuthLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the token contains characters
    /// not allowed in a header value.
    pub fn try_new(token: impl AsRef<str>) -> Result<Self, HttpError> {
        let mut value = HeaderValue::try_from(format!("Bearer {}", token.as_ref()))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl std::fmt::Debug for BearerAuthLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            value: self.value.clone(),
        }
    }
}

/// Service that injects the bearer token, see [`BearerAuthLayer`]
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    value: HeaderValue,
}

impl<S, ReqBody> Service<Request<ReqBody>> for BearerAuthService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // An explicit per-request credential wins
        if !req.headers().contains_key(AUTHORIZATION) {
            req.headers_mut().insert(AUTHORIZATION, self.value.clone());
        }
        self.inner.call(req)
    }
}
