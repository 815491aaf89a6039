//! Transport boundary and request abortion.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// The injected HTTP client the pipeline delegates actual network calls to.
///
/// The transport receives canonicalized requests and must map its failures
/// into [`Error`] variants so the retry and breaker layers can classify
/// them. Timeouts and size limits are enforced by the pipeline itself; the
/// transport only has to send and receive.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs a single network exchange.
    async fn send(&self, request: Request) -> Result<Response, Error>;
}

/// Adapter turning an async closure into a [`Transport`].
///
/// Handy in tests and for wrapping existing clients without a newtype.
pub struct FnTransport<F>(F);

impl<F, Fut> FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        FnTransport(f)
    }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    async fn send(&self, request: Request) -> Result<Response, Error> {
        (self.0)(request).await
    }
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancels an outstanding request from the outside.
///
/// Cloning yields handles to the same abort flag. Aborting is sticky: once
/// triggered, every present and future wait completes immediately, so a
/// handle must not be reused across requests.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

impl AbortHandle {
    /// Creates an un-triggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the abort.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the abort has been triggered.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once the abort is triggered.
    pub async fn aborted(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let mut notified = Box::pin(self.inner.notify.notified());
            // Register interest before re-checking so a concurrent abort()
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}
