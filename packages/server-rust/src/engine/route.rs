//! Resolved routes and the immutable route table.
//!
//! A [`RouteTable`] can only be produced by the resolver, which in turn only
//! accepts frozen registries. Holding one therefore proves every name in the
//! manifest was bound before the first request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use exodus_core::{RecordDescriptor, Transform};
use http::Method;

use super::handler::Handler;

// ---------------------------------------------------------------------------
// ResolvedRoute
// ---------------------------------------------------------------------------

/// A manifest route with every name replaced by the live value it refers to.
pub struct ResolvedRoute {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) handler_name: String,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) record: Option<RecordDescriptor>,
    pub(crate) chain: Vec<Transform>,
    pub(crate) required_role: Option<String>,
}

impl ResolvedRoute {
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    #[must_use]
    pub fn record(&self) -> Option<&RecordDescriptor> {
        self.record.as_ref()
    }

    /// Transforms in execution order.
    #[must_use]
    pub fn chain(&self) -> &[Transform] {
        &self.chain
    }

    #[must_use]
    pub fn required_role(&self) -> Option<&str> {
        self.required_role.as_deref()
    }

    /// `METHOD path`, used as the route's log and metrics label.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

impl fmt::Debug for ResolvedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler_name)
            .field("type", &self.record.as_ref().map(RecordDescriptor::type_name))
            .field(
                "chain",
                &self.chain.iter().map(Transform::name).collect::<Vec<_>>(),
            )
            .field("required_role", &self.required_role)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

/// Result of matching a request against the table.
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found(&'a ResolvedRoute),
    /// The path exists but not for this method.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// `(method, path) -> ResolvedRoute` mapping, read-only after construction.
#[derive(Debug, Default)]
pub struct RouteTable {
    by_path: HashMap<String, HashMap<Method, ResolvedRoute>>,
    /// Manifest order, for listings.
    order: Vec<(Method, String)>,
}

impl RouteTable {
    /// Builds the table. Callers guarantee `(method, path)` uniqueness.
    pub(crate) fn from_routes(routes: Vec<ResolvedRoute>) -> Self {
        let mut table = Self::default();
        for route in routes {
            table.order.push((route.method.clone(), route.path.clone()));
            table
                .by_path
                .entry(route.path.clone())
                .or_default()
                .insert(route.method.clone(), route);
        }
        table
    }

    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let Some(methods) = self.by_path.get(path) else {
            return RouteMatch::NotFound;
        };
        match methods.get(method) {
            Some(route) => RouteMatch::Found(route),
            None => {
                let mut allowed: Vec<Method> = methods.keys().cloned().collect();
                allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                RouteMatch::MethodNotAllowed(allowed)
            }
        }
    }

    #[must_use]
    pub fn get(&self, method: &Method, path: &str) -> Option<&ResolvedRoute> {
        self.by_path.get(path).and_then(|methods| methods.get(method))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Routes in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedRoute> {
        self.order
            .iter()
            .filter_map(|(method, path)| self.get(method, path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
