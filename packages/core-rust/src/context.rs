use serde::{Deserialize, Serialize};

/// Authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for route guards.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Returns whether `caller` satisfies a route's optional role requirement.
/// Anonymous callers only pass unguarded routes.
#[must_use]
pub fn role_satisfied(required: Option<&str>, caller: Option<&Principal>) -> bool {
    match required {
        None => true,
        Some(role) => caller.is_some_and(|p| p.has_role(role)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unguarded_route_admits_anyone() {
        assert!(role_satisfied(None, None));
        assert!(role_satisfied(None, Some(&Principal::new("u1", ["viewer"]))));
    }

    #[test]
    fn guarded_route_requires_exact_role() {
        let admin = Principal::new("u1", ["viewer", "admin"]);
        let viewer = Principal::new("u2", ["viewer"]);

        assert!(role_satisfied(Some("admin"), Some(&admin)));
        assert!(!role_satisfied(Some("admin"), Some(&viewer)));
        assert!(!role_satisfied(Some("admin"), None));
        assert!(!role_satisfied(Some("Admin"), Some(&admin)));
    }
}
