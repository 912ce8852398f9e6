//! Generic name-keyed registry with uniqueness-on-write and freeze semantics.
//!
//! Every registry in the engine (handlers, record types, transforms) is a
//! [`Registry`] specialised over its key and value. Entries are written only
//! during initialization; [`Registry::freeze`] turns the store read-only so the
//! serving phase can share it behind an `Arc` without any locking.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors raised by registry writes and lookups.
///
/// `kind` identifies which registry produced the error (`"handler"`, `"type"`,
/// `"transform"`) so aggregated startup reports stay readable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} `{name}` is already registered")]
    Conflict { kind: &'static str, name: String },
    #[error("{kind} `{name}` is not registered")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} registry is frozen; cannot register `{name}`")]
    Frozen { kind: &'static str, name: String },
}

impl RegistryError {
    /// Name of the entry the error refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Conflict { name, .. } | Self::NotFound { name, .. } | Self::Frozen { name, .. } => {
                name
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed store shared by every engine registry.
///
/// Writes take `&mut self`, so initialization is single-threaded by
/// construction. Once frozen the registry only answers reads.
#[derive(Debug, Clone)]
pub struct Registry<K, V> {
    kind: &'static str,
    entries: HashMap<K, V>,
    /// Registration order, used for listings and diagnostics.
    order: Vec<K>,
    frozen: bool,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + Display,
{
    /// Creates an empty, writable registry. `kind` labels errors.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            order: Vec::new(),
            frozen: false,
        }
    }

    /// Registry label used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Adds `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Frozen`] after [`freeze`](Self::freeze), even
    /// when the key is new, and [`RegistryError::Conflict`] when the key is
    /// already present. The existing entry is left untouched in both cases.
    pub fn register(&mut self, key: K, value: V) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen {
                kind: self.kind,
                name: key.to_string(),
            });
        }
        if self.entries.contains_key(&key) {
            return Err(RegistryError::Conflict {
                kind: self.kind,
                name: key.to_string(),
            });
        }
        self.order.push(key.clone());
        self.entries.insert(key, value);
        Ok(())
    }

    /// Returns the value registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if nothing is registered under `key`.
    pub fn lookup<Q>(&self, key: &Q) -> Result<&V, RegistryError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        self.entries.get(key).ok_or_else(|| RegistryError::NotFound {
            kind: self.kind,
            name: key.to_string(),
        })
    }

    /// Option-returning variant of [`lookup`](Self::lookup).
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Transitions the registry to read-only. Idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in registration order.
    pub fn names(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|value| (key, value)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
