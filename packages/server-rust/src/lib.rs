//! Exodus server: manifest resolution, the dispatch pipeline, and the axum runtime.
//!
//! Applications register handlers, record types and transforms on a
//! [`engine::Registrar`], then [`bootstrap::assemble`] resolves a route
//! manifest against the frozen registries and produces a
//! [`network::ServerRuntime`].

pub mod bootstrap;
pub mod cli;
pub mod engine;
pub mod network;
pub mod telemetry;

pub use bootstrap::{assemble, ManifestSource, ServerSettings, StartupError, StartupFault};
pub use cli::ServerArgs;
