//! Pipeline composition: combines all middleware layers around the dispatcher.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::admission::{AdmissionGate, AdmissionLayer, AdmissionService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::engine::config::DispatchConfig;
use crate::engine::dispatcher::Dispatcher;

/// The fully layered dispatch service. Named concretely so it stays `Clone`
/// and `Sync` inside shared HTTP state.
pub type DispatchPipeline = AdmissionService<TimeoutService<MetricsService<Dispatcher>>>;

/// Build the dispatch pipeline by wrapping the `Dispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `AdmissionLayer` -- refuse when saturated or closed (fail fast before doing any work)
///
/// The gate is reachable afterwards through [`AdmissionService::gate`].
/// 2. `TimeoutLayer` -- stamp and enforce the request deadline
/// 3. `MetricsLayer` -- record timing and outcome (closest to the dispatcher)
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: Dispatcher, config: &DispatchConfig) -> DispatchPipeline {
    let gate = AdmissionGate::new(config.max_concurrent_requests);
    let table = Arc::clone(dispatcher.table());
    ServiceBuilder::new()
        .layer(AdmissionLayer::new(gate, table))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(MetricsLayer)
        .service(dispatcher)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
