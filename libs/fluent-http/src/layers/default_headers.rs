use crate::config::DefaultHeaderPolicy;
use crate::headers::HeaderStore;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that copies a shared [`HeaderStore`] onto every request.
///
/// The store is read at call time, so headers changed after the client was
/// built apply to the next request. The read lock is released before the
/// inner service is called.
#[derive(Clone, Debug)]
pub struct DefaultHeadersLayer {
    store: Arc<HeaderStore>,
    policy: DefaultHeaderPolicy,
}

impl DefaultHeadersLayer {
    #[must_use]
    pub fn new(store: Arc<HeaderStore>, policy: DefaultHeaderPolicy) -> Self {
        Self { store, policy }
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }
}

/// Service that applies the default headers, see [`DefaultHeadersLayer`]
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    store: Arc<HeaderStore>,
    policy: DefaultHeaderPolicy,
}

impl<S, ReqBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
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
        self.store.apply_to(req.headers_mut(), self.policy);
        self.inner.call(req)
    }
}
