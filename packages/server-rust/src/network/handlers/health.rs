//! Health, liveness, and readiness endpoint handlers.
//!
//! Served under the reserved `/_exodus/` prefix so they never collide with
//! manifest routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` field tells "up but draining" apart from
/// "ready". `admission` reports the dispatch concurrency budget when the
/// controller holds the pipeline's gate.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();

    let mut body = json!({
        "service": &*state.service,
        "state": health.as_str(),
        "routes": state.table.len(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    });
    if let Some(gate) = state.shutdown.gate() {
        body["admission"] = json!({
            "limit": gate.limit(),
            "available": gate.available(),
        });
    }
    Json(body)
}

/// Liveness check -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check -- returns 200 when ready, 503 otherwise.
///
/// Returns 503 during startup, while draining, and after stop.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
