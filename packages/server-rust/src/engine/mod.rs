//! Dispatch engine: registration, manifest resolution and per-request execution.
//!
//! Startup order is enforced by types:
//! [`Registrar`] -> [`FrozenRegistries`] -> [`resolve`] -> [`RouteTable`] -> [`Dispatcher`].

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod middleware;
pub mod registrar;
pub mod resolver;
pub mod route;
pub mod signal;

pub use config::DispatchConfig;
pub use dispatcher::{DispatchError, DispatchRequest, DispatchState, Dispatcher, ErrorKind};
pub use handler::{
    handler_fn, Handler, HandlerContext, HandlerError, HandlerFn, HandlerRegistry, HandlerResponse,
};
pub use middleware::{build_dispatch_pipeline, AdmissionGate, DispatchPipeline};
pub use registrar::{FrozenRegistries, Registrar, RegistrationError};
pub use resolver::{resolve, MissingRef, ResolveError, RESERVED_PREFIX};
pub use route::{ResolvedRoute, RouteMatch, RouteTable};
pub use signal::RequestSignal;
