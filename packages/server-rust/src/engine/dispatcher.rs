//! Per-request execution of a resolved route.
//!
//! Every request walks the same fixed sequence of steps:
//!
//! ```text
//! Received -> Authorized -> Decoded -> Transformed -> Encoded -> HandlerInvoked -> Responded
//!     \___________\____________\____________\____________\______________\---> Failed(kind)
//! ```
//!
//! The request signal is checked before each step and raced against the
//! handler. Panics anywhere in the pipeline are contained at the
//! [`Dispatcher`] boundary and reported as [`ErrorKind::Internal`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use exodus_core::{role_satisfied, CodecError, DynRecord, Principal, Transform, TransformError};
use futures_util::FutureExt;
use http::{Method, StatusCode};
use tower::Service;
use tracing::{debug, error, warn};

use super::handler::{HandlerContext, HandlerError, HandlerResponse};
use super::route::{ResolvedRoute, RouteMatch, RouteTable};
use super::signal::RequestSignal;

// ---------------------------------------------------------------------------
// DispatchRequest
// ---------------------------------------------------------------------------

/// Transport-independent request handed to the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub path: String,
    pub body: Bytes,
    pub caller: Option<Principal>,
    pub request_id: String,
    pub signal: RequestSignal,
}

impl DispatchRequest {
    /// Anonymous request with a fresh request id and an unbounded signal.
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            body: body.into(),
            caller: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            signal: RequestSignal::unbounded(),
        }
    }

    #[must_use]
    pub fn with_caller(mut self, caller: Option<Principal>) -> Self {
        self.caller = caller;
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: RequestSignal) -> Self {
        self.signal = signal;
        self
    }
}

// ---------------------------------------------------------------------------
// DispatchState / ErrorKind
// ---------------------------------------------------------------------------

/// Position of a request in the dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Authorized,
    Decoded,
    Transformed,
    Encoded,
    HandlerInvoked,
    Responded,
    Failed(ErrorKind),
}

impl DispatchState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::Failed(_))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authorized => "authorized",
            Self::Decoded => "decoded",
            Self::Transformed => "transformed",
            Self::Encoded => "encoded",
            Self::HandlerInvoked => "handler_invoked",
            Self::Responded => "responded",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a dispatch failure; used for the error body and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Forbidden,
    BadRequest,
    PayloadTooLarge,
    TransformFailed,
    HandlerFailed,
    Internal,
    RouteNotFound,
    MethodNotAllowed,
    Overloaded,
    ShuttingDown,
    Canceled,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::BadRequest => "bad_request",
            Self::PayloadTooLarge => "payload_too_large",
            Self::TransformFailed => "transform_failed",
            Self::HandlerFailed => "handler_failed",
            Self::Internal => "internal_error",
            Self::RouteNotFound => "route_not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Overloaded => "overloaded",
            Self::ShuttingDown => "shutting_down",
            Self::Canceled => "canceled",
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Failure of a single request. Always recovered into an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("caller lacks required role `{role}`")]
    Forbidden { role: String },
    #[error("request body is not a valid `{type_name}`: {source}")]
    BadRequest {
        type_name: String,
        #[source]
        source: CodecError,
    },
    /// The transport could not read the body (too large, aborted upload).
    #[error("request body rejected: {message}")]
    BodyRejected { status: StatusCode, message: String },
    #[error("transform `{transform}` at position {position} failed: {source}")]
    TransformFailed {
        transform: String,
        position: usize,
        #[source]
        source: TransformError,
    },
    #[error("handler `{handler}` failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },
    #[error("internal error: {0}")]
    Internal(String),
    #[error("no route for {path}")]
    RouteNotFound { path: String },
    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },
    #[error("server is at its limit of {limit} concurrent dispatches")]
    Overloaded { limit: u32 },
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("request canceled (last step: {stage})")]
    Canceled { stage: DispatchState },
    #[error("request exceeded its {timeout_ms} ms deadline")]
    Timeout { timeout_ms: u64 },
}

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::BodyRejected { status, .. } if *status == StatusCode::PAYLOAD_TOO_LARGE => {
                ErrorKind::PayloadTooLarge
            }
            Self::BodyRejected { .. } => ErrorKind::BadRequest,
            Self::TransformFailed { .. } => ErrorKind::TransformFailed,
            Self::Handler { .. } => ErrorKind::HandlerFailed,
            Self::Internal(_) => ErrorKind::Internal,
            Self::RouteNotFound { .. } => ErrorKind::RouteNotFound,
            Self::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            Self::Overloaded { .. } => ErrorKind::Overloaded,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
            Self::Canceled { .. } | Self::Timeout { .. } => ErrorKind::Canceled,
        }
    }

    /// HTTP status this error is answered with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::BodyRejected { status, .. } => *status,
            Self::Handler { source, .. } => {
                source.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::TransformFailed { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Overloaded { .. } | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Canceled { .. } | Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }

    /// JSON error body: `{"error", "message", "request_id"}`.
    #[must_use]
    pub fn to_json(&self, request_id: &str) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind().as_str(),
            "message": self.to_string(),
            "request_id": request_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Executes requests against an immutable [`RouteTable`].
///
/// Cloning is cheap; every clone shares the same table.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Runs one request through its route's pipeline.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] of the first failing step. A panic in
    /// any step is returned as [`DispatchError::Internal`].
    pub async fn dispatch(&self, req: DispatchRequest) -> Result<HandlerResponse, DispatchError> {
        let request_id = req.request_id.clone();
        let table = Arc::clone(&self.table);
        match AssertUnwindSafe(run(table, req)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(request_id = %request_id, panic = %message, "dispatch panicked");
                Err(DispatchError::Internal("request processing panicked".to_string()))
            }
        }
    }
}

impl Service<DispatchRequest> for Dispatcher {
    type Response = HandlerResponse;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<HandlerResponse, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch(req).await })
    }
}

async fn run(table: Arc<RouteTable>, req: DispatchRequest) -> Result<HandlerResponse, DispatchError> {
    let route = match table.lookup(&req.method, &req.path) {
        RouteMatch::Found(route) => route,
        RouteMatch::MethodNotAllowed(allowed) => {
            return Err(DispatchError::MethodNotAllowed {
                method: req.method,
                path: req.path,
                allowed,
            })
        }
        RouteMatch::NotFound => return Err(DispatchError::RouteNotFound { path: req.path }),
    };
    let request_id = req.request_id.clone();
    PipelineRun::new(route, &request_id, req.signal.clone())
        .execute(req)
        .await
}

// ---------------------------------------------------------------------------
// PipelineRun
// ---------------------------------------------------------------------------

/// One request's walk through the state machine.
struct PipelineRun<'a> {
    route: &'a ResolvedRoute,
    request_id: &'a str,
    signal: RequestSignal,
    state: DispatchState,
}

impl<'a> PipelineRun<'a> {
    fn new(route: &'a ResolvedRoute, request_id: &'a str, signal: RequestSignal) -> Self {
        Self {
            route,
            request_id,
            signal,
            state: DispatchState::Received,
        }
    }

    async fn execute(mut self, req: DispatchRequest) -> Result<HandlerResponse, DispatchError> {
        match self.steps(req).await {
            Ok(response) => {
                self.enter(DispatchState::Responded);
                Ok(response)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn steps(&mut self, req: DispatchRequest) -> Result<HandlerResponse, DispatchError> {
        let route = self.route;

        self.checkpoint()?;
        if !role_satisfied(route.required_role(), req.caller.as_ref()) {
            return Err(DispatchError::Forbidden {
                role: route.required_role().unwrap_or_default().to_string(),
            });
        }
        self.enter(DispatchState::Authorized);

        self.checkpoint()?;
        let record = match route.record() {
            Some(descriptor) => Some(descriptor.decode(&req.body).map_err(|source| {
                DispatchError::BadRequest {
                    type_name: descriptor.type_name().to_string(),
                    source,
                }
            })?),
            None => None,
        };
        self.enter(DispatchState::Decoded);

        self.checkpoint()?;
        let record = match record {
            Some(record) => Some(self.run_chain(record)?),
            None => None,
        };
        self.enter(DispatchState::Transformed);

        self.checkpoint()?;
        let body = match (route.record(), record) {
            (Some(descriptor), Some(record)) => {
                let bytes = descriptor.encode(&*record).map_err(|e| {
                    DispatchError::Internal(format!("encoding `{}` failed: {e}", descriptor.type_name()))
                })?;
                Bytes::from(bytes)
            }
            _ => req.body,
        };
        self.enter(DispatchState::Encoded);

        self.checkpoint()?;
        self.enter(DispatchState::HandlerInvoked);
        let ctx = HandlerContext {
            request_id: self.request_id.to_string(),
            handler: route.handler_name().to_string(),
            method: req.method,
            path: req.path,
            caller: req.caller,
            signal: self.signal.clone(),
        };
        let signal = self.signal.clone();
        tokio::select! {
            biased;
            () = signal.cancelled() => Err(DispatchError::Canceled { stage: DispatchState::HandlerInvoked }),
            result = route.handler().call(ctx, body) => result.map_err(|source| DispatchError::Handler {
                handler: route.handler_name().to_string(),
                source,
            }),
        }
    }

    fn run_chain(&self, mut record: DynRecord) -> Result<DynRecord, DispatchError> {
        for (position, transform) in self.route.chain().iter().enumerate() {
            if position > 0 {
                self.checkpoint()?;
            }
            record = self.apply(transform, position, record)?;
        }
        Ok(record)
    }

    fn apply(
        &self,
        transform: &Transform,
        position: usize,
        record: DynRecord,
    ) -> Result<DynRecord, DispatchError> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| transform.apply(record))) {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(source)) => {
                warn!(
                    route = %self.route.label(),
                    request_id = %self.request_id,
                    transform = transform.name(),
                    position,
                    error = %source,
                    "transform failed"
                );
                Err(DispatchError::TransformFailed {
                    transform: transform.name().to_string(),
                    position,
                    source,
                })
            }
            Err(payload) => {
                error!(
                    route = %self.route.label(),
                    request_id = %self.request_id,
                    transform = transform.name(),
                    position,
                    panic = %panic_message(payload.as_ref()),
                    "transform panicked"
                );
                Err(DispatchError::Internal(format!(
                    "transform `{}` panicked",
                    transform.name()
                )))
            }
        }
    }

    fn checkpoint(&self) -> Result<(), DispatchError> {
        if self.signal.is_cancelled() {
            Err(DispatchError::Canceled { stage: self.state })
        } else {
            Ok(())
        }
    }

    fn enter(&mut self, next: DispatchState) {
        debug!(request_id = %self.request_id, from = %self.state, to = %next, "dispatch step");
        self.state = next;
    }

    fn fail(&mut self, err: DispatchError) -> DispatchError {
        debug!(
            request_id = %self.request_id,
            route = %self.route.label(),
            stage = %self.state,
            kind = err.kind().as_str(),
            "dispatch failed"
        );
        self.state = DispatchState::Failed(err.kind());
        err
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use exodus_core::{JsonCodec, Manifest, ManifestRoute};
    use serde::{Deserialize, Serialize};
    use tower::ServiceExt;

    use super::*;
    use crate::engine::registrar::Registrar;
    use crate::engine::resolver::resolve;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    struct Feedback {
        content: String,
        is_negative: bool,
        tags: Vec<String>,
    }

    /// No serde defaults: a non-empty body must carry every field.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        note: String,
    }

    fn sentiment(mut fb: Feedback) -> Result<Feedback, TransformError> {
        let lower = fb.content.to_lowercase();
        let positive = ["love", "great", "happy"].iter().any(|w| lower.contains(w));
        let tag = if positive { "Positive Sentiment" } else { "Needs Attention" };
        fb.tags.push(tag.to_string());
        Ok(fb)
    }

    fn tagger(mut fb: Feedback) -> Result<Feedback, TransformError> {
        if fb.is_negative {
            fb.tags.push("neg".to_string());
        }
        Ok(fb)
    }

    fn reject(_fb: Feedback) -> Result<Feedback, TransformError> {
        Err(TransformError::rejected("content flagged"))
    }

    fn explode(_fb: Feedback) -> Result<Feedback, TransformError> {
        panic!("transform bug")
    }

    struct Fixture {
        dispatcher: Dispatcher,
        handler_calls: Arc<AtomicUsize>,
    }

    fn fixture(routes: Vec<ManifestRoute>) -> Fixture {
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let mut r = Registrar::new();
        let calls = Arc::clone(&handler_calls);
        r.handler_fn("echo.body", move |_ctx, body| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(HandlerResponse::ok(body)) }
        })
        .handler_fn("health.ok", |_ctx, _body| async {
            Ok(HandlerResponse::ok(r#"{"status":"ok"}"#))
        })
        .handler_fn("conflict", |_ctx, _body| async {
            Err::<HandlerResponse, _>(HandlerError::with_status(
                StatusCode::CONFLICT,
                anyhow::anyhow!("taken"),
            ))
        })
        .handler_fn("broken", |_ctx, _body| async {
            Err::<HandlerResponse, _>(HandlerError::new(anyhow::anyhow!("db down")))
        })
        .handler_fn("panics", |_ctx, _body| async {
            if true {
                panic!("handler bug");
            }
            Ok(HandlerResponse::ok("{}"))
        })
        .handler_fn("slow", |_ctx, _body| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(HandlerResponse::ok("{}"))
        })
        .record_type::<Feedback, _>("feedback.v1", JsonCodec)
        .transform::<Feedback, _>("feedback.v1", "sentiment", sentiment)
        .transform::<Feedback, _>("feedback.v1", "tagger", tagger)
        .transform::<Feedback, _>("feedback.v1", "reject", reject)
        .transform::<Feedback, _>("feedback.v1", "explode", explode)
        .record_type::<Order, _>("order.v1", JsonCodec);
        let (registries, faults) = r.freeze();
        assert!(faults.is_empty(), "{faults:?}");

        let table = resolve(&Manifest::new(routes), &registries).unwrap();
        Fixture {
            dispatcher: Dispatcher::new(Arc::new(table)),
            handler_calls,
        }
    }

    fn feedback_route(transforms: &[&str]) -> ManifestRoute {
        ManifestRoute::new("POST", "/feedback", "echo.body")
            .with_type("feedback.v1")
            .with_transforms(transforms.iter().copied())
    }

    fn post(path: &str, body: &str) -> DispatchRequest {
        DispatchRequest::new(Method::POST, path, body.to_string())
    }

    #[tokio::test]
    async fn health_route_returns_handler_body() {
        let f = fixture(vec![ManifestRoute::new("GET", "/healthz", "health.ok")]);
        let resp = f
            .dispatcher
            .dispatch(DispatchRequest::new(Method::GET, "/healthz", Bytes::new()))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, Bytes::from_static(br#"{"status":"ok"}"#));
    }

    #[tokio::test]
    async fn feedback_chain_tags_in_declared_order() {
        let f = fixture(vec![feedback_route(&["sentiment", "tagger"])]);
        let resp = f
            .dispatcher
            .dispatch(post(
                "/feedback",
                r#"{"content":"I love this","isNegative":true}"#,
            ))
            .await
            .unwrap();
        let out: Feedback = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(out.tags, vec!["Positive Sentiment", "neg"]);
        assert_eq!(out.content, "I love this");
    }

    #[tokio::test]
    async fn reversed_chain_reverses_tags() {
        let f = fixture(vec![feedback_route(&["tagger", "sentiment"])]);
        let resp = f
            .dispatcher
            .dispatch(post("/feedback", r#"{"content":"meh","isNegative":true}"#))
            .await
            .unwrap();
        let out: Feedback = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(out.tags, vec!["neg", "Needs Attention"]);
    }

    #[tokio::test]
    async fn empty_body_decodes_as_default() {
        let f = fixture(vec![feedback_route(&["sentiment"])]);
        let resp = f.dispatcher.dispatch(post("/feedback", "")).await.unwrap();
        let out: Feedback = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(out.tags, vec!["Needs Attention"]);
    }

    #[tokio::test]
    async fn empty_body_skips_mandatory_fields() {
        let f = fixture(vec![
            ManifestRoute::new("POST", "/o", "echo.body").with_type("order.v1")
        ]);
        let resp = f.dispatcher.dispatch(post("/o", "")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        let out: Order = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(out, Order::default());

        let err = f.dispatcher.dispatch(post("/o", "{}")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn role_guard_rejects_before_decoding() {
        let f = fixture(vec![feedback_route(&["sentiment"]).with_role("admin")]);

        // Malformed body: a 403 proves decode never ran.
        let err = f
            .dispatcher
            .dispatch(post("/feedback", "not json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);

        let viewer = Principal::new("u-1", ["viewer"]);
        let err = f
            .dispatcher
            .dispatch(post("/feedback", "{}").with_caller(Some(viewer)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let admin = Principal::new("u-2", ["admin"]);
        let resp = f
            .dispatcher
            .dispatch(post("/feedback", "{}").with_caller(Some(admin)))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(f.handler_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let f = fixture(vec![feedback_route(&[])]);
        let err = f
            .dispatcher
            .dispatch(post("/feedback", "{not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest { ref type_name, .. } if type_name == "feedback.v1"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transform_failure_short_circuits_chain() {
        let f = fixture(vec![feedback_route(&["sentiment", "reject", "tagger"])]);
        let err = f
            .dispatcher
            .dispatch(post("/feedback", "{}"))
            .await
            .unwrap_err();
        match &err {
            DispatchError::TransformFailed {
                transform,
                position,
                ..
            } => {
                assert_eq!(transform, "reject");
                assert_eq!(*position, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_before_decode_skips_everything() {
        let f = fixture(vec![feedback_route(&["sentiment"])]);
        let signal = RequestSignal::unbounded();
        signal.cancel();

        let err = f
            .dispatcher
            .dispatch(post("/feedback", "{}").with_signal(signal))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Canceled {
                stage: DispatchState::Received
            }
        ));
        assert_eq!(err.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_handler() {
        let f = fixture(vec![ManifestRoute::new("GET", "/slow", "slow")]);
        let signal = RequestSignal::unbounded().with_timeout(Duration::from_millis(50));
        let err = f
            .dispatcher
            .dispatch(DispatchRequest::new(Method::GET, "/slow", Bytes::new()).with_signal(signal))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Canceled {
                stage: DispatchState::HandlerInvoked
            }
        ));
    }

    #[tokio::test]
    async fn handler_errors_map_to_status() {
        let f = fixture(vec![
            ManifestRoute::new("POST", "/conflict", "conflict"),
            ManifestRoute::new("POST", "/broken", "broken"),
        ]);
        let err = f.dispatcher.dispatch(post("/conflict", "")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err = f.dispatcher.dispatch(post("/broken", "")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), ErrorKind::HandlerFailed);
    }

    #[tokio::test]
    async fn panics_are_contained_as_internal_errors() {
        let f = fixture(vec![
            ManifestRoute::new("POST", "/panics", "panics"),
            feedback_route(&["explode"]),
        ]);
        let err = f.dispatcher.dispatch(post("/panics", "")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err = f.dispatcher.dispatch(post("/feedback", "{}")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("explode"));
    }

    #[tokio::test]
    async fn unknown_path_and_method() {
        let f = fixture(vec![ManifestRoute::new("GET", "/healthz", "health.ok")]);
        let err = f.dispatcher.dispatch(post("/nope", "")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = f.dispatcher.dispatch(post("/healthz", "")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(matches!(err, DispatchError::MethodNotAllowed { ref allowed, .. } if allowed == &[Method::GET]));
    }

    #[tokio::test]
    async fn concurrent_dispatches_do_not_interfere() {
        let f = fixture(vec![feedback_route(&["sentiment", "tagger"])]);
        let mut tasks = Vec::new();
        for i in 0..64 {
            let dispatcher = f.dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                let body = format!(r#"{{"content":"msg {i}","isNegative":{}}}"#, i % 2 == 0);
                let resp = dispatcher.dispatch(post("/feedback", &body)).await.unwrap();
                (i, serde_json::from_slice::<Feedback>(&resp.body).unwrap())
            }));
        }
        for task in tasks {
            let (i, out) = task.await.unwrap();
            assert_eq!(out.content, format!("msg {i}"));
            let expected: Vec<&str> = if i % 2 == 0 {
                vec!["Needs Attention", "neg"]
            } else {
                vec!["Needs Attention"]
            };
            assert_eq!(out.tags, expected);
        }
        assert_eq!(f.handler_calls.load(Ordering::SeqCst), 64);
    }

    #[tokio::test]
    async fn dispatcher_is_a_tower_service() {
        let f = fixture(vec![ManifestRoute::new("GET", "/healthz", "health.ok")]);
        let resp = f
            .dispatcher
            .oneshot(DispatchRequest::new(Method::GET, "/healthz", Bytes::new()))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[test]
    fn error_body_has_kind_message_and_request_id() {
        let err = DispatchError::Forbidden {
            role: "admin".to_string(),
        };
        let body = err.to_json("req-9");
        assert_eq!(body["error"], "forbidden");
        assert_eq!(body["request_id"], "req-9");
        assert!(body["message"].as_str().unwrap().contains("admin"));
    }
}
