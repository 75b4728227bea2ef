use crate::config::HttpClientConfig;
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::{Request, Response};
use http_body::{Body, Frame, SizeHint};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::WaitForCancellationFutureOwned;
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Request body type carried through the pipeline.
pub type RequestBody = Full<Bytes>;

/// Type-erased bottom stage of the pipeline (and the shape of every wrapped stage).
///
/// Anything that turns a request into a response can be a transport: the
/// default [`HyperTransport`], a tower stack, or a closure via [`transport_fn`].
/// Transports are `Clone + Send + Sync`; cloning is how concurrent executions
/// get their own handle.
pub type Transport = BoxCloneSyncService<Request<RequestBody>, Response<ResponseBody>, HttpError>;

/// Boxed future returned by [`HyperTransport`].
pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Build a [`Transport`] from an async closure.
///
/// Useful for fakes in tests and for adapters to other HTTP stacks.
///
/// ```ignore
/// let transport = transport_fn(|req: Request<RequestBody>| async move {
///     Ok(Response::new(response_body(req.uri().path().to_owned())))
/// });
/// ```
pub fn transport_fn<F, Fut>(f: F) -> Transport
where
    F: Fn(Request<RequestBody>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<ResponseBody>, HttpError>> + Send + 'static,
{
    BoxCloneSyncService::new(tower::service_fn(f))
}

/// Default transport: pooled hyper client over rustls with transparent
/// response decompression.
///
/// Honours the [`RequestContext`] found in request extensions and applies the
/// client-wide `request_timeout` as a separate bound. Both keep applying while
/// the response body streams in, so a server that stalls mid-body cannot hang
/// the reader.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Transport,
    timeout: Option<Duration>,
}

impl HyperTransport {
    /// Build the transport described by `config`.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the configured root store is unusable.
    pub fn new(config: &HttpClientConfig) -> Result<Self, HttpError> {
        let https = tls::build_https_connector(config.tls_roots)?;

        // pool_timer is required for idle connections to ever expire
        let hyper_client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .build::<_, RequestBody>(https);

        let service = ServiceBuilder::new()
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(map_decompression_response)
            .map_err(HttpError::from);

        Ok(Self {
            inner: BoxCloneSyncService::new(service),
            timeout: config.request_timeout,
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn into_transport(self) -> Transport {
        BoxCloneSyncService::new(self)
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Service<Request<RequestBody>> for HyperTransport {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = TransportFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<RequestBody>) -> Self::Future {
        let context = RequestContext::of(&req).cloned().unwrap_or_default();
        let timeout = self.timeout;
        let started = Instant::now();

        // Take the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let response = context
                .run(async move {
                    let call = inner.call(req);
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, call)
                            .await
                            .map_err(|_| HttpError::Timeout(limit))?,
                        None => call.await,
                    }
                })
                .await?;

            let timeout = timeout.map(|limit| (started, limit));
            Ok(response.map(|body| GuardedBody::wrap(body, &context, timeout)))
        })
    }
}

pin_project! {
    /// Response body still bound by the request's cancellation, deadline and
    /// client-wide timeout.
    ///
    /// Violations surface as a boxed [`HttpError`] body error, which the
    /// response readers unwrap back into `Cancelled`, `DeadlineExceeded` or
    /// `Timeout`.
    struct GuardedBody {
        #[pin]
        inner: ResponseBody,
        cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
        deadline: Option<Pin<Box<Sleep>>>,
        timeout: Option<(Pin<Box<Sleep>>, Duration)>,
    }
}

impl GuardedBody {
    /// `timeout` is the instant the request started plus the client-wide limit.
    fn wrap(
        body: ResponseBody,
        context: &RequestContext,
        timeout: Option<(Instant, Duration)>,
    ) -> ResponseBody {
        if context.cancellation().is_none() && context.deadline().is_none() && timeout.is_none() {
            return body;
        }

        Self {
            inner: body,
            cancelled: context
                .cancellation()
                .map(|token| Box::pin(token.clone().cancelled_owned())),
            deadline: context
                .deadline()
                .map(|deadline| Box::pin(tokio::time::sleep_until(deadline))),
            timeout: timeout.map(|(started, limit)| {
                (Box::pin(tokio::time::sleep_until(started + limit)), limit)
            }),
        }
        .boxed()
    }
}

impl Body for GuardedBody {
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        // Same precedence as RequestContext::run
        if let Some(cancelled) = this.cancelled.as_mut()
            && cancelled.as_mut().poll(cx).is_ready()
        {
            return Poll::Ready(Some(Err(Box::new(HttpError::Cancelled))));
        }
        if let Some(deadline) = this.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            return Poll::Ready(Some(Err(Box::new(HttpError::DeadlineExceeded))));
        }
        if let Some((sleep, limit)) = this.timeout.as_mut()
            && sleep.as_mut().poll(cx).is_ready()
        {
            return Poll::Ready(Some(Err(Box::new(HttpError::Timeout(*limit)))));
        }

        this.inner.poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Box the decompression body into [`ResponseBody`].
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}
