//! Metrics middleware for dispatches.
//!
//! Wraps each dispatch in a `tracing` span recording duration and outcome,
//! and feeds the `exodus_dispatch_total` counter and
//! `exodus_dispatch_duration_seconds` histogram.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::engine::dispatcher::{DispatchError, DispatchRequest, ErrorKind};
use crate::engine::handler::HandlerResponse;

/// Route label for requests that matched no route.
pub(crate) const UNMATCHED: &str = "unmatched";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatches with timing and counting.
#[derive(Debug, Clone, Copy)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records dispatch duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<DispatchRequest> for MetricsService<S>
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

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let route = format!("{} {}", req.method, req.path);

        let span = info_span!(
            "dispatch",
            route = %route,
            request_id = %req.request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = outcome(&result);
                let route = match &result {
                    Err(e) if matches!(e.kind(), ErrorKind::RouteNotFound | ErrorKind::MethodNotAllowed) => {
                        UNMATCHED.to_string()
                    }
                    _ => route,
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!("exodus_dispatch_total", "route" => route.clone(), "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("exodus_dispatch_duration_seconds", "route" => route)
                    .record(elapsed.as_secs_f64());

                tracing::info!(duration_ms, outcome, "dispatch complete");

                result
            }
            .instrument(span),
        )
    }
}

fn outcome(result: &Result<HandlerResponse, DispatchError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
