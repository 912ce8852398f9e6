//! Fallback handler that feeds every request outside `/_exodus` into the dispatch pipeline.

use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tower::ServiceExt;
use tracing::{error, warn};

use super::AppState;
use crate::engine::{DispatchError, DispatchRequest, ErrorKind, HandlerResponse, RequestSignal};
use crate::network::middleware::REQUEST_ID_HEADER;

/// Dispatches one HTTP request.
///
/// The dispatch runs on its own task. If this handler's future is dropped
/// (client disconnect) the request's cancellation token fires and the
/// pipeline stops at its next checkpoint. A body over the configured limit
/// is answered with a JSON 413 like every other dispatch error.
pub async fn dispatch_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

    if !state.shutdown.is_accepting() {
        return error_response(&DispatchError::ShuttingDown, &request_id);
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let err = DispatchError::BodyRejected {
                status: rejection.status(),
                message: rejection.body_text(),
            };
            return error_response(&err, &request_id);
        }
    };

    let in_flight = state.shutdown.in_flight_guard();
    let token = state.shutdown.request_token();
    let disconnect = token.clone().drop_guard();

    let req = DispatchRequest {
        method,
        path: uri.path().to_string(),
        body,
        caller: state.auth.authenticate(&headers),
        request_id: request_id.clone(),
        signal: RequestSignal::new(token, None),
    };

    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move {
        let _in_flight = in_flight;
        pipeline.oneshot(req).await
    });
    let outcome = task.await;
    // Finished or failed on its own; the token no longer needs cancelling.
    drop(disconnect.disarm());

    match outcome {
        Ok(Ok(response)) => success_response(response),
        Ok(Err(e)) => error_response(&e, &request_id),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "dispatch task failed");
            error_response(
                &DispatchError::Internal("dispatch task failed".to_string()),
                &request_id,
            )
        }
    }
}

fn success_response(response: HandlerResponse) -> Response {
    (
        response.status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}

/// Renders a dispatch error as its status plus the JSON error body.
pub fn error_response(err: &DispatchError, request_id: &str) -> Response {
    let status = err.status();
    if status.is_server_error() && err.kind() != ErrorKind::Overloaded {
        warn!(request_id = %request_id, kind = err.kind().as_str(), error = %err, "request failed");
    }

    let mut response = (status, Json(err.to_json(request_id))).into_response();
    if let DispatchError::MethodNotAllowed { allowed, .. } = err {
        let allow = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.headers_mut().insert(header::ALLOW, value);
        }
    }
    response
}
