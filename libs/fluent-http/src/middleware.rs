//! Middleware and the pipeline that stacks them over a transport.
//!
//! A middleware turns one [`Transport`] into another. Registered middlewares
//! compose so that the first one registered is the outermost: it sees the
//! outgoing request first and the incoming response last.
//!
//! ```text
//! registered: [M1, M2, M3]        effective: M1(M2(M3(base)))
//!
//!   request  ──► M1 ──► M2 ──► M3 ──► base
//!   response ◄── M1 ◄── M2 ◄── M3 ◄──┘
//! ```

use crate::error::HttpError;
use crate::response::ResponseBody;
use crate::transport::{RequestBody, Transport, transport_fn};
use arc_swap::ArcSwap;
use http::{Request, Response};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

/// Interceptor around a [`Transport`].
///
/// Implementations must not retain `inner` beyond the returned transport and
/// should propagate inner errors unchanged unless intercepting them is their
/// whole purpose.
///
/// Plain closures `Fn(Transport) -> Transport` implement this trait, as do
/// tower layers via [`from_layer`] and async functions via [`from_fn`].
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, inner: Transport) -> Transport;
}

impl<F> Middleware for F
where
    F: Fn(Transport) -> Transport + Send + Sync + 'static,
{
    fn wrap(&self, inner: Transport) -> Transport {
        self(inner)
    }
}

/// Adapter that turns a tower [`Layer`] into a [`Middleware`].
#[derive(Clone, Debug)]
pub struct LayerMiddleware<L> {
    layer: L,
}

/// Use a tower layer as middleware.
///
/// The layered service must keep the pipeline's request, response and error
/// types; map them first if the layer changes any of them.
pub fn from_layer<L>(layer: L) -> LayerMiddleware<L> {
    LayerMiddleware { layer }
}

impl<L> Middleware for LayerMiddleware<L>
where
    L: Layer<Transport> + Send + Sync + 'static,
    L::Service: Service<Request<RequestBody>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + Sync
        + 'static,
    <L::Service as Service<Request<RequestBody>>>::Future: Send + 'static,
{
    fn wrap(&self, inner: Transport) -> Transport {
        BoxCloneSyncService::new(self.layer.layer(inner))
    }
}

/// Remainder of the pipeline, handed to [`from_fn`] middleware.
pub struct Next {
    inner: Transport,
}

impl Next {
    /// Pass the request to the next stage.
    ///
    /// # Errors
    /// Whatever the inner stages return.
    pub async fn run(self, req: Request<RequestBody>) -> Result<Response<ResponseBody>, HttpError> {
        self.inner.oneshot(req).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Middleware built from an async function, see [`from_fn`].
pub struct FnMiddleware<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Write middleware as an async function of the request and the rest of the pipeline.
///
/// ```ignore
/// let logging = from_fn(|req: Request<RequestBody>, next: Next| async move {
///     tracing::info!(uri = %req.uri(), "sending");
///     let response = next.run(req).await;
///     tracing::info!(ok = response.is_ok(), "done");
///     response
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F, Fut>
where
    F: Fn(Request<RequestBody>, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<ResponseBody>, HttpError>> + Send + 'static,
{
    FnMiddleware {
        f,
        _future: PhantomData,
    }
}

impl<F, Fut> Middleware for FnMiddleware<F, Fut>
where
    F: Fn(Request<RequestBody>, Next) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<ResponseBody>, HttpError>> + Send + 'static,
{
    fn wrap(&self, inner: Transport) -> Transport {
        let f = self.f.clone();
        transport_fn(move |req| {
            let next = Next {
                inner: inner.clone(),
            };
            f(req, next)
        })
    }
}

/// Append-only, ordered list of middlewares shared by a client.
///
/// The list is swapped as a whole on every registration, so a concurrent
/// reader sees either the list before or after an append, never a partial one.
pub struct MiddlewareChain {
    stack: ArcSwap<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register `middleware` as the innermost entry so far.
    pub fn push(&self, middleware: Arc<dyn Middleware>) {
        self.stack.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&middleware));
            next
        });
    }

    /// Current list, unaffected by later registrations.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<dyn Middleware>>> {
        self.stack.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.load().is_empty()
    }

    /// Wrap `base` with the current list, first registered outermost.
    #[must_use]
    pub fn compose(&self, base: Transport) -> Transport {
        self.snapshot()
            .iter()
            .rev()
            .fold(base, |transport, middleware| middleware.wrap(transport))
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::response_body;
    use bytes::Bytes;
    use http::{HeaderValue, StatusCode};
    use http_body_util::Full;
    use parking_lot::Mutex;
    use tower_http::set_header::SetRequestHeaderLayer;

    type Log = Arc<Mutex<Vec<String>>>;

    fn request() -> Request<RequestBody> {
        Request::get("http://fake.local/")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    /// Base transport that records the headers it received.
    fn recording_transport(log: Log) -> Transport {
        transport_fn(move |req: Request<RequestBody>| {
            let log = Arc::clone(&log);
            async move {
                let mut names: Vec<_> = req.headers().keys().map(ToString::to_string).collect();
                names.sort();
                log.lock().push(format!("transport:{}", names.join(",")));
                Ok(Response::new(response_body("ok")))
            }
        })
    }

    fn tracer(name: &'static str, log: Log) -> impl Middleware {
        from_fn(move |req: Request<RequestBody>, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}:request"));
                let response = next.run(req).await;
                log.lock().push(format!("{name}:response"));
                response
            }
        })
    }

    #[tokio::test]
    async fn test_first_registered_is_outermost() {
        let log = Log::default();
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(tracer("m1", Arc::clone(&log))));
        chain.push(Arc::new(tracer("m2", Arc::clone(&log))));
        chain.push(Arc::new(tracer("m3", Arc::clone(&log))));

        let transport = chain.compose(recording_transport(Arc::clone(&log)));
        transport.oneshot(request()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "m1:request",
                "m2:request",
                "m3:request",
                "transport:",
                "m3:response",
                "m2:response",
                "m1:response",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let log = Log::default();
        let chain = MiddlewareChain::default();
        assert!(chain.is_empty());

        let transport = chain.compose(recording_transport(Arc::clone(&log)));
        let response = transport.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock(), vec!["transport:"]);
    }

    /// Middleware that logs whether the request already carries `authorization`.
    fn auth_observer(log: Log) -> impl Middleware {
        from_fn(move |req: Request<RequestBody>, next: Next| {
            let log = Arc::clone(&log);
            async move {
                let seen = req.headers().contains_key(http::header::AUTHORIZATION);
                log.lock().push(format!("observer saw auth: {seen}"));
                next.run(req).await
            }
        })
    }

    fn auth_injector() -> impl Middleware {
        from_layer(SetRequestHeaderLayer::overriding(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret"),
        ))
    }

    #[tokio::test]
    async fn test_observer_before_auth_does_not_see_header() {
        let log = Log::default();
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(auth_observer(Arc::clone(&log))));
        chain.push(Arc::new(auth_injector()));

        chain
            .compose(recording_transport(Arc::clone(&log)))
            .oneshot(request())
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["observer saw auth: false", "transport:authorization"]
        );
    }

    #[tokio::test]
    async fn test_observer_after_auth_sees_header() {
        let log = Log::default();
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(auth_injector()));
        chain.push(Arc::new(auth_observer(Arc::clone(&log))));

        chain
            .compose(recording_transport(Arc::clone(&log)))
            .oneshot(request())
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["observer saw auth: true", "transport:authorization"]
        );
    }

    #[tokio::test]
    async fn test_closure_middleware_short_circuits() {
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(|_inner: Transport| {
            transport_fn(|_req: Request<RequestBody>| async {
                Err::<Response<ResponseBody>, _>(HttpError::Cancelled)
            })
        }));

        let log = Log::default();
        let result = chain
            .compose(recording_transport(Arc::clone(&log)))
            .oneshot(request())
            .await;

        assert!(matches!(result, Err(HttpError::Cancelled)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_inner_error_propagates_unchanged() {
        let log = Log::default();
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(tracer("outer", Arc::clone(&log))));

        let failing = transport_fn(|_req: Request<RequestBody>| async {
            Err::<Response<ResponseBody>, _>(HttpError::DeadlineExceeded)
        });
        let result = chain.compose(failing).oneshot(request()).await;

        assert!(matches!(result, Err(HttpError::DeadlineExceeded)));
        assert_eq!(*log.lock(), vec!["outer:request", "outer:response"]);
    }

    #[tokio::test]
    async fn test_composed_transport_ignores_later_registrations() {
        let log = Log::default();
        let chain = MiddlewareChain::new();
        chain.push(Arc::new(tracer("early", Arc::clone(&log))));

        let composed = chain.compose(recording_transport(Arc::clone(&log)));
        chain.push(Arc::new(tracer("late", Arc::clone(&log))));

        composed.oneshot(request()).await.unwrap();
        assert!(!log.lock().iter().any(|entry| entry.starts_with("late")));

        log.lock().clear();
        chain
            .compose(recording_transport(Arc::clone(&log)))
            .oneshot(request())
            .await
            .unwrap();
        assert!(log.lock().iter().any(|entry| entry == "late:request"));
    }

    struct Passthrough;

    impl Middleware for Passthrough {
        fn wrap(&self, inner: Transport) -> Transport {
            inner
        }
    }

    #[test]
    fn test_concurrent_push_never_exposes_torn_list() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 200;

        let chain = MiddlewareChain::new();
        std::thread::scope(|s| {
            for _ in 0..WRITERS {
                let chain = &chain;
                s.spawn(move || {
                    for _ in 0..PER_WRITER {
                        chain.push(Arc::new(Passthrough));
                    }
                });
            }

            let chain = &chain;
            s.spawn(move || {
                let mut last_len = 0;
                for _ in 0..1_000 {
                    let snapshot = chain.snapshot();
                    // Lists only grow, and a snapshot never changes after it is taken
                    assert!(snapshot.len() >= last_len);
                    let len_before = snapshot.len();
                    std::thread::yield_now();
                    assert_eq!(snapshot.len(), len_before);
                    last_len = snapshot.len();
                }
            });
        });

        assert_eq!(chain.len(), WRITERS * PER_WRITER);
    }
}
