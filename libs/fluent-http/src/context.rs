use crate::error::HttpError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal bound to a single request.
///
/// The request builder stores the context in the request's extensions so it
/// travels through every middleware unchanged. The transport at the bottom of
/// the pipeline is responsible for honouring it; the default transport does so
/// via [`RequestContext::run`].
///
/// # Example
///
/// ```ignore
/// let token = CancellationToken::new();
/// let pending = client
///     .get("https://example.com/slow")
///     .context(RequestContext::new().with_cancellation(token.clone()))
///     .send();
///
/// token.cancel(); // the in-flight request fails with HttpError::Cancelled
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a deadline `timeout` from now. An earlier existing deadline wins.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bind an absolute deadline. An earlier existing deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    /// Bind a cancellation token, replacing any previous one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Context attached to `request`, if any.
    #[must_use]
    pub fn of<B>(request: &http::Request<B>) -> Option<&RequestContext> {
        request.extensions().get::<RequestContext>()
    }

    /// Drive `operation` until it completes, the token fires, or the deadline passes.
    ///
    /// Cancellation is checked before the deadline, and both before the
    /// operation is polled, so an already-cancelled request never starts.
    ///
    /// # Errors
    /// Returns `HttpError::Cancelled`, `HttpError::DeadlineExceeded`, or the
    /// operation's own error.
    pub async fn run<F, T>(&self, operation: F) -> Result<T, HttpError>
    where
        F: Future<Output = Result<T, HttpError>>,
    {
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Err(HttpError::Cancelled),
            () = expired => Err(HttpError::DeadlineExceeded),
            result = operation => result,
        }
    }
}
