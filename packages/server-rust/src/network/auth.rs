//! Caller identity from `Authorization: Bearer <jwt>` headers.

use exodus_core::Principal;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// JWT claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (caller id).
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiration time (Unix timestamp).
    pub exp: u64,
}

/// Verifies HS256 bearer tokens against a shared secret.
///
/// Without a secret every request is anonymous.
#[derive(Clone)]
pub struct Authenticator {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    #[must_use]
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Authenticator that treats every caller as anonymous.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Resolves the caller from request headers. A missing, malformed or
    /// invalid token yields an anonymous caller.
    #[must_use]
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<Principal> {
        let key = self.key.as_ref()?;
        let token = bearer_token(headers)?;
        match decode::<Claims>(token, key, &self.validation) {
            Ok(data) => Some(Principal::new(data.claims.sub, data.claims.roles)),
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                None
            }
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}
