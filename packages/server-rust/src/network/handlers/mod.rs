//! HTTP handler definitions for the Exodus server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for building the router.

pub mod dispatch;
pub mod health;

pub use dispatch::{dispatch_handler, error_response};
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{DispatchPipeline, RouteTable};

use super::{Authenticator, ShutdownController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Layered dispatch service; cloned per request.
    pub pipeline: DispatchPipeline,
    /// Resolved routes, read-only.
    pub table: Arc<RouteTable>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Bearer token verification.
    pub auth: Arc<Authenticator>,
    /// Service label from configuration or the manifest.
    pub service: Arc<str>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
