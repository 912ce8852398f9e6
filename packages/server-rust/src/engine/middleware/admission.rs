//! Admission control in front of the dispatch pipeline.
//!
//! An [`AdmissionGate`] holds one permit per dispatch that may run at once.
//! The gate is shared: the pipeline takes permits, the HTTP runtime reads
//! its capacity for the health report and closes it when shutdown starts.
//! A request that finds no free permit gets `Overloaded`; one that arrives
//! after the gate closed gets `ShuttingDown`. Refusals are counted per route.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tower::{Layer, Service};

use super::metrics::UNMATCHED;
use crate::engine::dispatcher::{DispatchError, DispatchRequest};
use crate::engine::handler::HandlerResponse;
use crate::engine::route::{RouteMatch, RouteTable};

// ---------------------------------------------------------------------------
// AdmissionGate
// ---------------------------------------------------------------------------

/// Shared concurrency budget for dispatches.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    limit: u32,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit as usize)),
            limit,
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Permits currently free. Zero once the gate is closed.
    #[must_use]
    pub fn available(&self) -> usize {
        if self.permits.is_closed() {
            0
        } else {
            self.permits.available_permits()
        }
    }

    /// Refuses every later dispatch with `ShuttingDown`. Dispatches already
    /// admitted keep their permits.
    pub fn close(&self) {
        self.permits.close();
    }

    fn admit(&self) -> Result<OwnedSemaphorePermit, DispatchError> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => DispatchError::Overloaded { limit: self.limit },
                TryAcquireError::Closed => DispatchError::ShuttingDown,
            })
    }
}

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Tower layer that admits dispatches through an [`AdmissionGate`].
///
/// The route table is only used to label refusals; routing itself happens
/// in the dispatcher.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    gate: AdmissionGate,
    table: Arc<RouteTable>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(gate: AdmissionGate, table: Arc<RouteTable>) -> Self {
        Self { gate, table }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            gate: self.gate.clone(),
            table: Arc::clone(&self.table),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    gate: AdmissionGate,
    table: Arc<RouteTable>,
}

impl<S> AdmissionService<S> {
    #[must_use]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    fn route_label(&self, req: &DispatchRequest) -> String {
        match self.table.lookup(&req.method, &req.path) {
            RouteMatch::Found(route) => route.label(),
            RouteMatch::MethodNotAllowed(_) | RouteMatch::NotFound => UNMATCHED.to_string(),
        }
    }
}

impl<S> Service<DispatchRequest> for AdmissionService<S>
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
        let permit = match self.gate.admit() {
            Ok(permit) => permit,
            Err(refusal) => {
                let route = self.route_label(&req);
                let reason = refusal.kind().as_str();
                tracing::warn!(
                    request_id = %req.request_id,
                    route = %route,
                    reason,
                    limit = self.gate.limit(),
                    "dispatch refused"
                );
                metrics::counter!("exodus_dispatch_refused_total", "route" => route, "reason" => reason)
                    .increment(1);
                return Box::pin(async move { Err(refusal) });
            }
        };

        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use exodus_core::{Manifest, ManifestRoute};
    use http::{Method, StatusCode};
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::registrar::Registrar;
    use crate::engine::resolver::resolve;

    /// Completes once the paired sender fires (or is dropped).
    #[derive(Clone)]
    struct HeldService {
        release: Arc<tokio::sync::Mutex<Option<oneshot::Receiver<()>>>>,
    }

    impl Service<DispatchRequest> for HeldService {
        type Response = HandlerResponse;
        type Error = DispatchError;
        type Future =
            Pin<Box<dyn Future<Output = Result<HandlerResponse, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: DispatchRequest) -> Self::Future {
            let release = Arc::clone(&self.release);
            Box::pin(async move {
                let rx = release.lock().await.take();
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok(HandlerResponse::ok("{}"))
            })
        }
    }

    fn table() -> Arc<RouteTable> {
        let mut r = Registrar::new();
        r.handler_fn("health.ok", |_ctx, _body| async { Ok(HandlerResponse::ok("{}")) });
        let (registries, _) = r.freeze();
        let manifest = Manifest::new(vec![ManifestRoute::new("GET", "/healthz", "health.ok")]);
        Arc::new(resolve(&manifest, &registries).unwrap())
    }

    fn held() -> (HeldService, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let svc = HeldService {
            release: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        };
        (svc, tx)
    }

    fn get(path: &str) -> DispatchRequest {
        DispatchRequest::new(Method::GET, path, Bytes::new())
    }

    #[tokio::test]
    async fn admits_while_permits_are_free() {
        let (svc, tx) = held();
        drop(tx);
        let svc = AdmissionLayer::new(AdmissionGate::new(4), table()).layer(svc);
        let resp = svc.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn refuses_with_limit_once_saturated() {
        let gate = AdmissionGate::new(1);
        let (svc, tx) = held();
        let mut svc = AdmissionLayer::new(gate.clone(), table()).layer(svc);

        let first = tokio::spawn(svc.call(get("/healthz")));
        tokio::task::yield_now().await;
        assert_eq!(gate.available(), 0);

        let err = svc.call(get("/healthz")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded { limit: 1 }));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains('1'));

        tx.send(()).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn closed_gate_refuses_as_shutting_down() {
        let gate = AdmissionGate::new(8);
        let (svc, tx) = held();
        drop(tx);
        let svc = AdmissionLayer::new(gate.clone(), table()).layer(svc);

        gate.close();
        assert_eq!(gate.available(), 0);

        let err = svc.oneshot(get("/unknown")).await.unwrap_err();
        assert!(matches!(err, DispatchError::ShuttingDown));
    }

    #[tokio::test]
    async fn admitted_dispatch_finishes_after_close() {
        let gate = AdmissionGate::new(2);
        let (svc, tx) = held();
        let mut svc = AdmissionLayer::new(gate.clone(), table()).layer(svc);

        let in_flight = tokio::spawn(svc.call(get("/healthz")));
        tokio::task::yield_now().await;
        gate.close();
        tx.send(()).unwrap();

        let resp = tokio::time::timeout(Duration::from_secs(1), in_flight)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[test]
    fn refusals_are_labelled_by_route() {
        let (svc, _tx) = held();
        let svc = AdmissionLayer::new(AdmissionGate::new(1), table()).layer(svc);
        assert_eq!(svc.route_label(&get("/healthz")), "GET /healthz");
        assert_eq!(svc.route_label(&get("/nope")), UNMATCHED);
    }
}
