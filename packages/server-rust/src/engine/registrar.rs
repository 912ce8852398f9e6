//! Registration surface for application code.
//!
//! The [`Registrar`] owns the three registries while the process initializes.
//! Registration never aborts on the first problem: every fault is recorded and
//! handed back by [`Registrar::freeze`] so startup can report them all at once.

use std::future::Future;

use bytes::Bytes;
use exodus_core::{
    Codec, Record, RecordDescriptor, RegistryError, TransformError, TransformRegistry,
    TypeRegistrationError, TypeRegistry,
};
use tracing::error;

use super::handler::{handler_fn, Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerResponse};

/// A registration call that failed.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Type(#[from] TypeRegistrationError),
}

// ---------------------------------------------------------------------------
// Registrar
// ---------------------------------------------------------------------------

/// Collects handlers, record types and transforms during initialization.
#[derive(Debug, Default)]
pub struct Registrar {
    handlers: HandlerRegistry,
    types: TypeRegistry,
    transforms: TransformRegistry,
    faults: Vec<RegistrationError>,
}

impl Registrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `name`.
    pub fn handler<H: Handler>(&mut self, name: &str, handler: H) -> &mut Self {
        if let Err(e) = self.handlers.register(name, handler) {
            self.record_fault(e.into());
        }
        self
    }

    /// Registers an async closure as a handler under `name`.
    pub fn handler_fn<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(HandlerContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResponse, HandlerError>> + Send + 'static,
    {
        self.handler(name, handler_fn(f))
    }

    /// Registers record type `T` under `type_name`. A duplicate name or a
    /// codec that fails the zero-value round-trip is recorded as a fault.
    pub fn record_type<T, C>(&mut self, type_name: &str, codec: C) -> &mut Self
    where
        T: Record + Default,
        C: Codec<T>,
    {
        self.record_descriptor(RecordDescriptor::new::<T, C>(type_name, codec))
    }

    /// Registers a prepared descriptor (e.g. one with a custom builder).
    pub fn record_descriptor(&mut self, descriptor: RecordDescriptor) -> &mut Self {
        if let Err(e) = self.types.register_descriptor(descriptor) {
            self.record_fault(e.into());
        }
        self
    }

    /// Registers `func` as transform `name` for records of `type_name`.
    pub fn transform<T, F>(&mut self, type_name: &str, name: &str, func: F) -> &mut Self
    where
        T: Record,
        F: Fn(T) -> Result<T, TransformError> + Send + Sync + 'static,
    {
        if let Err(e) = self.transforms.register::<T, F>(type_name, name, func) {
            self.record_fault(e.into());
        }
        self
    }

    /// Faults recorded so far.
    #[must_use]
    pub fn faults(&self) -> &[RegistrationError] {
        &self.faults
    }

    /// Freezes all registries and ends the registration phase.
    pub fn freeze(mut self) -> (FrozenRegistries, Vec<RegistrationError>) {
        self.handlers.freeze();
        self.types.freeze();
        self.transforms.freeze();
        tracing::info!(
            handlers = self.handlers.len(),
            types = self.types.len(),
            transforms = self.transforms.len(),
            faults = self.faults.len(),
            "registries frozen"
        );
        (
            FrozenRegistries {
                handlers: self.handlers,
                types: self.types,
                transforms: self.transforms,
            },
            self.faults,
        )
    }

    fn record_fault(&mut self, fault: RegistrationError) {
        error!(error = %fault, "registration failed");
        self.faults.push(fault);
    }
}

// ---------------------------------------------------------------------------
// FrozenRegistries
// ---------------------------------------------------------------------------

/// The three registries after the registration phase. Only obtainable from
/// [`Registrar::freeze`], so every registry inside is read-only.
#[derive(Debug)]
pub struct FrozenRegistries {
    handlers: HandlerRegistry,
    types: TypeRegistry,
    transforms: TransformRegistry,
}

impl FrozenRegistries {
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    #[must_use]
    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
