//! Named per-type transforms and their registry.
//!
//! A transform is a function `T -> Result<T, TransformError>` scoped to a
//! record type name. Transforms may be invoked from many requests at once, so
//! they are `Fn + Send + Sync` and must not mutate anything but their input.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::codec::Record;
use crate::record::DynRecord;
use crate::registry::{Registry, RegistryError};

/// Failure reported by a transform.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The transform refused the record.
    #[error("{0}")]
    Rejected(String),
    /// The pipeline handed the transform a record of another Rust type.
    #[error("transform expected a `{expected}` record")]
    TypeMismatch { expected: &'static str },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransformError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

type ErasedFn = dyn Fn(DynRecord) -> Result<DynRecord, TransformError> + Send + Sync;

// ---------------------------------------------------------------------------
// TransformKey
// ---------------------------------------------------------------------------

/// `(type name, transform name)` key of the transform registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformKey {
    pub type_name: String,
    pub transform: String,
}

impl TransformKey {
    pub fn new(type_name: impl Into<String>, transform: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            transform: transform.into(),
        }
    }
}

impl fmt::Display for TransformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_name, self.transform)
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// A registered transform with its record type erased.
#[derive(Clone)]
pub struct Transform {
    name: String,
    record_type: TypeId,
    rust_type: &'static str,
    func: Arc<ErasedFn>,
}

impl Transform {
    /// Wraps a typed transform over `T`.
    pub fn new<T, F>(name: impl Into<String>, func: F) -> Self
    where
        T: Record,
        F: Fn(T) -> Result<T, TransformError> + Send + Sync + 'static,
    {
        let erased = move |record: DynRecord| -> Result<DynRecord, TransformError> {
            let typed = record
                .downcast::<T>()
                .map_err(|_| TransformError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            let out = func(*typed)?;
            Ok(Box::new(out) as DynRecord)
        };
        Self {
            name: name.into(),
            record_type: TypeId::of::<T>(),
            rust_type: std::any::type_name::<T>(),
            func: Arc::new(erased),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn record_type(&self) -> TypeId {
        self.record_type
    }

    #[must_use]
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// Runs the transform, consuming the record.
    ///
    /// # Errors
    ///
    /// Propagates the transform's own error, or
    /// [`TransformError::TypeMismatch`] if `record` is not the expected type.
    pub fn apply(&self, record: DynRecord) -> Result<DynRecord, TransformError> {
        (self.func)(record)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("rust_type", &self.rust_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// TransformRegistry
// ---------------------------------------------------------------------------

/// Registry of transforms keyed by `(type name, transform name)`.
#[derive(Debug, Clone)]
pub struct TransformRegistry {
    inner: Registry<TransformKey, Transform>,
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Registry::new("transform"),
        }
    }

    /// Registers `func` as `transform` for records named `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] if the pair already exists, or
    /// [`RegistryError::Frozen`] after freeze.
    pub fn register<T, F>(
        &mut self,
        type_name: &str,
        transform: &str,
        func: F,
    ) -> Result<(), RegistryError>
    where
        T: Record,
        F: Fn(T) -> Result<T, TransformError> + Send + Sync + 'static,
    {
        self.inner.register(
            TransformKey::new(type_name, transform),
            Transform::new::<T, F>(transform, func),
        )?;
        tracing::debug!(type_name, transform, "transform registered");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] naming `type_name/transform`.
    pub fn lookup(&self, type_name: &str, transform: &str) -> Result<&Transform, RegistryError> {
        self.inner.lookup(&TransformKey::new(type_name, transform))
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

    /// Transform names registered for `type_name`, in registration order.
    pub fn names_for<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .names()
            .filter(move |key| key.type_name == type_name)
            .map(|key| key.transform.as_str())
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
