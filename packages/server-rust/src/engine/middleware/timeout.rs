//! Deadline middleware for dispatches.
//!
//! Stamps each request's signal with a deadline so the dispatcher observes it
//! between steps, and bounds the whole call with `tokio::time::timeout_at`.
//! Requests that run past the deadline are cancelled and answered with
//! `DispatchError::Timeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::engine::dispatcher::{DispatchError, DispatchRequest};
use crate::engine::handler::HandlerResponse;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer applying one request timeout to every dispatch. An earlier
/// deadline already present on the request is kept.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the request deadline.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<DispatchRequest> for TimeoutService<S>
where
    S: Service<DispatchRequest, Response = HandlerResponse, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = HandlerResponse;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<HandlerResponse, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: DispatchRequest) -> Self::Future {
        req.signal = req.signal.with_timeout(self.timeout);
        let signal = req.signal.clone();
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.timeout.as_millis() as u64;
        let fut = self.inner.call(req);

        Box::pin(async move {
            let Some(deadline) = signal.deadline() else {
                return fut.await;
            };
            match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    signal.cancel();
                    Err(DispatchError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
