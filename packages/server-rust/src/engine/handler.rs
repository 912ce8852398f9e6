//! Request handlers and the handler registry.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use exodus_core::{Principal, Registry, RegistryError};
use http::{Method, StatusCode};

use super::signal::RequestSignal;

// ---------------------------------------------------------------------------
// HandlerContext / HandlerResponse / HandlerError
// ---------------------------------------------------------------------------

/// Per-request information handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub request_id: String,
    /// Registry name of the handler being invoked.
    pub handler: String,
    pub method: Method,
    pub path: String,
    pub caller: Option<Principal>,
    /// Cancellation signal; long-running handlers should observe it.
    pub signal: RequestSignal,
}

/// Successful handler output. The status is passed to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: &'static str,
}

impl HandlerResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: "application/json",
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }
}

/// Handler failure, optionally carrying the status code to answer with.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct HandlerError {
    status: Option<StatusCode>,
    #[source]
    source: anyhow::Error,
}

impl HandlerError {
    /// Error without an explicit status; answered with 500.
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self {
            status: None,
            source: source.into(),
        }
    }

    pub fn with_status(status: StatusCode, source: impl Into<anyhow::Error>) -> Self {
        Self {
            status: Some(status),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(source: anyhow::Error) -> Self {
        Self::new(source)
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// Application request handler bound to a manifest route by name.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: HandlerContext, body: Bytes) -> Result<HandlerResponse, HandlerError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

/// Wraps `f` so it can be registered as a handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(HandlerContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse, HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(HandlerContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse, HandlerError>> + Send + 'static,
{
    async fn call(&self, ctx: HandlerContext, body: Bytes) -> Result<HandlerResponse, HandlerError> {
        (self.0)(ctx, body).await
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Registry of handlers keyed by route handler name.
pub struct HandlerRegistry {
    inner: Registry<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Registry::new("handler"),
        }
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] for a duplicate name, or
    /// [`RegistryError::Frozen`] after freeze.
    pub fn register<H: Handler>(&mut self, name: &str, handler: H) -> Result<(), RegistryError> {
        self.inner.register(name.to_string(), Arc::new(handler))?;
        tracing::debug!(handler = name, "handler registered");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown name.
    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn Handler>, RegistryError> {
        self.inner.lookup(name)
    }

    pub fn freeze(&mut self) {
        self.inner.freeze();
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.is_frozen()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.names().map(String::as_str)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names().collect::<Vec<_>>())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
