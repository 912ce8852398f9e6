//! HTTP transport: configuration, caller authentication, middleware,
//! shutdown control and the server runtime.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod runtime;
pub mod shutdown;

pub use auth::{Authenticator, Claims};
pub use config::*;
pub use handlers::AppState;
pub use runtime::ServerRuntime;
pub use shutdown::*;
