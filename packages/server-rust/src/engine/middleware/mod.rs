//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`admission`]: Shared concurrency gate, closed on shutdown
//! - [`timeout`]: Per-request deadline enforcement
//! - [`metrics`]: Dispatch timing and counting via `tracing` spans and `metrics`
//! - [`pipeline`]: Composes all layers around the [`Dispatcher`](super::Dispatcher)

pub mod admission;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use admission::{AdmissionGate, AdmissionLayer, AdmissionService};
pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
pub use timeout::TimeoutLayer;
