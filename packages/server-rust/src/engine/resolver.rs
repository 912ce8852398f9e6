//! Manifest resolution: binds every manifest name to a frozen registry entry.
//!
//! Resolution is all-or-nothing. Every route is checked and every failure is
//! collected; a [`RouteTable`] is returned only when nothing failed.

use std::collections::HashSet;
use std::fmt;

use exodus_core::{Manifest, ManifestRoute, RecordDescriptor, Transform};
use http::Method;
use tracing::{debug, info};

use super::registrar::FrozenRegistries;
use super::route::{ResolvedRoute, RouteTable};

/// Path prefix reserved for the runtime's own health endpoints.
pub const RESERVED_PREFIX: &str = "/_exodus";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A manifest reference with no matching registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingRef {
    Handler(String),
    Type(String),
    Transform {
        type_name: String,
        transform: String,
        /// Zero-based position in the route's chain.
        position: usize,
    },
}

impl MissingRef {
    /// The unresolved name itself.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Handler(name) | Self::Type(name) => name,
            Self::Transform { transform, .. } => transform,
        }
    }
}

impl fmt::Display for MissingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(name) => write!(f, "handler `{name}`"),
            Self::Type(name) => write!(f, "type `{name}`"),
            Self::Transform {
                type_name,
                transform,
                position,
            } => write!(
                f,
                "transform `{transform}` for type `{type_name}` (chain position {position})"
            ),
        }
    }
}

/// One resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("route {route}: {missing} is not registered")]
    NotFound { route: String, missing: MissingRef },
    #[error("duplicate route {method} {path}")]
    RouteConflict { method: String, path: String },
    #[error("route {route}: transforms declared without a record type")]
    TransformWithoutType { route: String },
    #[error(
        "route {route}: transform `{transform}` operates on `{transform_type}` but type `{type_name}` decodes into `{record_type}`"
    )]
    TypeMismatch {
        route: String,
        type_name: String,
        transform: String,
        transform_type: &'static str,
        record_type: &'static str,
    },
    #[error("route {route}: invalid method `{method}`")]
    InvalidMethod { route: String, method: String },
    #[error("route {route}: invalid path: {reason}")]
    InvalidPath { route: String, reason: &'static str },
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

/// Resolves `manifest` against frozen registries.
///
/// # Errors
///
/// Returns every [`ResolveError`] found across all routes, in manifest order.
pub fn resolve(
    manifest: &Manifest,
    registries: &FrozenRegistries,
) -> Result<RouteTable, Vec<ResolveError>> {
    let mut errors = Vec::new();
    let mut routes = Vec::with_capacity(manifest.routes.len());
    let mut seen: HashSet<(Method, String)> = HashSet::new();

    for declared in &manifest.routes {
        let label = declared.label();
        let before = errors.len();

        let method = parse_method(declared, &label, &mut errors);
        check_path(&declared.path, &label, &mut errors);
        if let Some(method) = &method {
            if !seen.insert((method.clone(), declared.path.clone())) {
                errors.push(ResolveError::RouteConflict {
                    method: method.to_string(),
                    path: declared.path.clone(),
                });
            }
        }

        let handler = match registries.handlers().lookup(&declared.handler) {
            Ok(handler) => Some(handler.clone()),
            Err(_) => {
                errors.push(ResolveError::NotFound {
                    route: label.clone(),
                    missing: MissingRef::Handler(declared.handler.clone()),
                });
                None
            }
        };

        let record = resolve_record(declared, &label, registries, &mut errors);
        let chain = resolve_chain(declared, &label, record.as_ref(), registries, &mut errors);

        if errors.len() > before {
            continue;
        }
        if let (Some(method), Some(handler)) = (method, handler) {
            debug!(route = %label, handler = %declared.handler, chain = chain.len(), "route resolved");
            routes.push(ResolvedRoute {
                method,
                path: declared.path.clone(),
                handler_name: declared.handler.clone(),
                handler,
                record,
                chain,
                required_role: declared.required_role.clone(),
            });
        }
    }

    if errors.is_empty() {
        info!(routes = routes.len(), "manifest resolved");
        Ok(RouteTable::from_routes(routes))
    } else {
        Err(errors)
    }
}

fn parse_method(route: &ManifestRoute, label: &str, errors: &mut Vec<ResolveError>) -> Option<Method> {
    let upper = route.method.trim().to_ascii_uppercase();
    match Method::from_bytes(upper.as_bytes()) {
        Ok(method) if !upper.is_empty() => Some(method),
        _ => {
            errors.push(ResolveError::InvalidMethod {
                route: label.to_string(),
                method: route.method.clone(),
            });
            None
        }
    }
}

fn check_path(path: &str, label: &str, errors: &mut Vec<ResolveError>) {
    let reason = if !path.starts_with('/') {
        Some("must start with `/`")
    } else if path == RESERVED_PREFIX || path.starts_with(&format!("{RESERVED_PREFIX}/")) {
        Some("`/_exodus` is reserved for runtime endpoints")
    } else if path.contains(char::is_whitespace) {
        Some("must not contain whitespace")
    } else {
        None
    };
    if let Some(reason) = reason {
        errors.push(ResolveError::InvalidPath {
            route: label.to_string(),
            reason,
        });
    }
}

fn resolve_record(
    route: &ManifestRoute,
    label: &str,
    registries: &FrozenRegistries,
    errors: &mut Vec<ResolveError>,
) -> Option<RecordDescriptor> {
    let type_name = route.type_name.as_deref()?;
    match registries.types().lookup(type_name) {
        Ok(descriptor) => Some(descriptor.clone()),
        Err(_) => {
            errors.push(ResolveError::NotFound {
                route: label.to_string(),
                missing: MissingRef::Type(type_name.to_string()),
            });
            None
        }
    }
}

fn resolve_chain(
    route: &ManifestRoute,
    label: &str,
    record: Option<&RecordDescriptor>,
    registries: &FrozenRegistries,
    errors: &mut Vec<ResolveError>,
) -> Vec<Transform> {
    if route.transforms.is_empty() {
        return Vec::new();
    }
    let Some(type_name) = route.type_name.as_deref() else {
        errors.push(ResolveError::TransformWithoutType {
            route: label.to_string(),
        });
        return Vec::new();
    };

    let mut chain = Vec::with_capacity(route.transforms.len());
    for (position, name) in route.transforms.iter().enumerate() {
        match registries.transforms().lookup(type_name, name) {
            Ok(transform) => {
                if let Some(descriptor) = record {
                    if descriptor.record_type() != transform.record_type() {
                        errors.push(ResolveError::TypeMismatch {
                            route: label.to_string(),
                            type_name: type_name.to_string(),
                            transform: name.clone(),
                            transform_type: transform.rust_type(),
                            record_type: descriptor.rust_type(),
                        });
                        continue;
                    }
                }
                chain.push(transform.clone());
            }
            Err(_) => errors.push(ResolveError::NotFound {
                route: label.to_string(),
                missing: MissingRef::Transform {
                    type_name: type_name.to_string(),
                    transform: name.clone(),
                    position,
                },
            }),
        }
    }
    chain
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use exodus_core::{JsonCodec, ManifestRoute};
    use serde::{Deserialize, Serialize};

    use proptest::prelude::*;

    use super::*;
    use crate::engine::handler::HandlerResponse;
    use crate::engine::route::RouteMatch;
    use crate::engine::registrar::Registrar;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Feedback {
        tags: Vec<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Other {
        n: u32,
    }

    fn registries() -> FrozenRegistries {
        let mut r = Registrar::new();
        r.handler_fn("health.ok", |_ctx, _body| async {
            Ok(HandlerResponse::ok(r#"{"status":"ok"}"#))
        })
        .handler_fn("echo.body", |_ctx, body| async move { Ok(HandlerResponse::ok(body)) })
        .record_type::<Feedback, _>("feedback.v1", JsonCodec)
        .transform::<Feedback, _>("feedback.v1", "sentiment", Ok)
        .transform::<Feedback, _>("feedback.v1", "tagger", Ok)
        .transform::<Other, _>("feedback.v1", "foreign", Ok);
        let (registries, faults) = r.freeze();
        assert!(faults.is_empty());
        registries
    }

    #[test]
    fn resolves_valid_manifest_preserving_chain_order() {
        let manifest = Manifest::new(vec![
            ManifestRoute::new("get", "/healthz", "health.ok"),
            ManifestRoute::new("POST", "/feedback", "echo.body")
                .with_type("feedback.v1")
                .with_transforms(["tagger", "sentiment"])
                .with_role("admin"),
        ]);

        let table = resolve(&manifest, &registries()).unwrap();
        assert_eq!(table.len(), 2);

        let health = table.get(&Method::GET, "/healthz").unwrap();
        assert!(health.record().is_none());
        assert!(health.chain().is_empty());

        let feedback = table.get(&Method::POST, "/feedback").unwrap();
        let chain: Vec<_> = feedback.chain().iter().map(Transform::name).collect();
        assert_eq!(chain, vec!["tagger", "sentiment"]);
        assert_eq!(feedback.required_role(), Some("admin"));
        assert_eq!(feedback.record().unwrap().type_name(), "feedback.v1");
    }

    #[test]
    fn unknown_transform_fails_with_its_name() {
        let manifest = Manifest::new(vec![ManifestRoute::new("POST", "/feedback", "echo.body")
            .with_type("feedback.v1")
            .with_transforms(["sentiment", "nonexistent"])]);

        let errors = resolve(&manifest, &registries()).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ResolveError::NotFound { missing, .. } => {
                assert_eq!(missing.name(), "nonexistent");
                assert!(matches!(missing, MissingRef::Transform { position: 1, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn all_failures_are_collected() {
        let manifest = Manifest::new(vec![
            ManifestRoute::new("GET", "/a", "missing.handler"),
            ManifestRoute::new("POST", "/b", "echo.body").with_type("missing.v1"),
            ManifestRoute::new("POST", "/c", "echo.body").with_transforms(["sentiment"]),
            ManifestRoute::new("GET", "/healthz", "health.ok"),
            ManifestRoute::new("get", "/healthz", "health.ok"),
        ]);

        let errors = resolve(&manifest, &registries()).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:#?}");
        assert!(matches!(&errors[0], ResolveError::NotFound { missing: MissingRef::Handler(h), .. } if h == "missing.handler"));
        assert!(matches!(&errors[1], ResolveError::NotFound { missing: MissingRef::Type(t), .. } if t == "missing.v1"));
        assert!(matches!(&errors[2], ResolveError::TransformWithoutType { .. }));
        assert!(matches!(&errors[3], ResolveError::RouteConflict { method, path } if method == "GET" && path == "/healthz"));
    }

    #[test]
    fn transform_for_other_rust_type_is_mismatch() {
        let manifest = Manifest::new(vec![ManifestRoute::new("POST", "/f", "echo.body")
            .with_type("feedback.v1")
            .with_transforms(["foreign"])]);

        let errors = resolve(&manifest, &registries()).unwrap_err();
        assert!(matches!(&errors[0], ResolveError::TypeMismatch { transform, .. } if transform == "foreign"));
    }

    #[test]
    fn invalid_method_and_paths_are_rejected() {
        let manifest = Manifest::new(vec![
            ManifestRoute::new("GE T", "/x", "health.ok"),
            ManifestRoute::new("GET", "no-slash", "health.ok"),
            ManifestRoute::new("GET", "/_exodus/ready", "health.ok"),
        ]);

        let errors = resolve(&manifest, &registries()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(&errors[0], ResolveError::InvalidMethod { .. }));
        assert!(matches!(&errors[1], ResolveError::InvalidPath { .. }));
        assert!(matches!(&errors[2], ResolveError::InvalidPath { .. }));
    }

    #[test]
    fn empty_manifest_resolves_to_empty_table() {
        let table = resolve(&Manifest::default(), &registries()).unwrap();
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn distinct_paths_all_resolve_and_match(
            paths in proptest::collection::btree_set("/[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,2}", 1..16)
        ) {
            let manifest = Manifest::new(
                paths.iter().map(|p| ManifestRoute::new("GET", p.as_str(), "health.ok")).collect(),
            );
            let table = resolve(&manifest, &registries()).unwrap();
            prop_assert_eq!(table.len(), paths.len());
            for path in &paths {
                prop_assert!(matches!(table.lookup(&Method::GET, path), RouteMatch::Found(_)));
                prop_assert!(matches!(
                    table.lookup(&Method::POST, path),
                    RouteMatch::MethodNotAllowed(_)
                ));
            }
        }
    }
}
