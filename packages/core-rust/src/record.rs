//! Record descriptors and the type registry.
//!
//! A [`RecordDescriptor`] is the capability set `{decode, encode, zero value}`
//! for one named record type. It is strongly typed when built and loosely
//! typed at the registry boundary: decoded records travel through the
//! pipeline as [`DynRecord`] and are downcast back by the transforms and codec
//! registered for the same Rust type.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::codec::{Codec, CodecError, Record};
use crate::registry::{Registry, RegistryError};

/// A decoded record on its way through the pipeline.
pub type DynRecord = Box<dyn Any + Send>;

// ---------------------------------------------------------------------------
// Erased descriptor operations
// ---------------------------------------------------------------------------

trait DescriptorOps: Send + Sync {
    fn codec_name(&self) -> &'static str;
    fn decode(&self, bytes: &[u8]) -> Result<DynRecord, CodecError>;
    fn encode(&self, record: &dyn Any) -> Result<Vec<u8>, CodecError>;
    fn zero_value(&self) -> DynRecord;
    fn self_check(&self, type_name: &str) -> Result<(), CodecError>;
}

struct Typed<T, C> {
    codec: C,
    builder: fn() -> T,
}

impl<T: Record, C: Codec<T>> DescriptorOps for Typed<T, C> {
    fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynRecord, CodecError> {
        let record: T = self.codec.decode(bytes)?;
        Ok(Box::new(record))
    }

    fn encode(&self, record: &dyn Any) -> Result<Vec<u8>, CodecError> {
        let record = record
            .downcast_ref::<T>()
            .ok_or(CodecError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        self.codec.encode(record)
    }

    fn zero_value(&self) -> DynRecord {
        Box::new((self.builder)())
    }

    fn self_check(&self, type_name: &str) -> Result<(), CodecError> {
        let zero = (self.builder)();
        let bytes = self.codec.encode(&zero)?;
        let back = self.codec.decode(&bytes)?;
        if back == zero {
            Ok(())
        } else {
            Err(CodecError::RoundTrip {
                codec: self.codec.name(),
                type_name: type_name.to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// RecordDescriptor
// ---------------------------------------------------------------------------

/// Named codec and zero-value builder for one record type. Cheap to clone.
#[derive(Clone)]
pub struct RecordDescriptor {
    type_name: String,
    record_type: TypeId,
    rust_type: &'static str,
    ops: Arc<dyn DescriptorOps>,
}

impl RecordDescriptor {
    /// Describes `T` under `type_name`, using `T::default()` as zero value.
    pub fn new<T, C>(type_name: impl Into<String>, codec: C) -> Self
    where
        T: Record + Default,
        C: Codec<T>,
    {
        Self::with_builder(type_name, codec, T::default)
    }

    /// Describes `T` under `type_name` with an explicit zero-value builder.
    pub fn with_builder<T, C>(type_name: impl Into<String>, codec: C, builder: fn() -> T) -> Self
    where
        T: Record,
        C: Codec<T>,
    {
        Self {
            type_name: type_name.into(),
            record_type: TypeId::of::<T>(),
            rust_type: std::any::type_name::<T>(),
            ops: Arc::new(Typed { codec, builder }),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `TypeId` of the Rust type this descriptor decodes into.
    #[must_use]
    pub fn record_type(&self) -> TypeId {
        self.record_type
    }

    /// Rust type name, for diagnostics.
    #[must_use]
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    #[must_use]
    pub fn codec_name(&self) -> &'static str {
        self.ops.codec_name()
    }

    /// Decodes a request body. An empty body yields the builder's zero
    /// value without consulting the codec.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`CodecError::Decode`] on malformed input.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynRecord, CodecError> {
        if bytes.is_empty() {
            Ok(self.ops.zero_value())
        } else {
            self.ops.decode(bytes)
        }
    }

    /// Encodes a record produced by [`decode`](Self::decode) or a transform.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] if `record` is not this
    /// descriptor's Rust type, or the codec's encode error.
    pub fn encode(&self, record: &dyn Any) -> Result<Vec<u8>, CodecError> {
        self.ops.encode(record)
    }

    #[must_use]
    pub fn zero_value(&self) -> DynRecord {
        self.ops.zero_value()
    }

    /// Encodes the zero value and decodes it back, requiring equality.
    ///
    /// # Errors
    ///
    /// Returns the codec failure or [`CodecError::RoundTrip`] on mismatch.
    pub fn self_check(&self) -> Result<(), CodecError> {
        self.ops.self_check(&self.type_name)
    }
}

impl fmt::Debug for RecordDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordDescriptor")
            .field("type_name", &self.type_name)
            .field("rust_type", &self.rust_type)
            .field("codec", &self.ops.codec_name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Reasons a record type could not be registered.
#[derive(Debug, thiserror::Error)]
pub enum TypeRegistrationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("type `{type_name}` failed codec self-check: {source}")]
    SelfCheck {
        type_name: String,
        #[source]
        source: CodecError,
    },
}

/// Registry of record descriptors keyed by type name.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    inner: Registry<String, RecordDescriptor>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Registry::new("type"),
        }
    }

    /// Registers `T` under `type_name` with the given codec.
    ///
    /// # Errors
    ///
    /// See [`register_descriptor`](Self::register_descriptor).
    pub fn register<T, C>(&mut self, type_name: &str, codec: C) -> Result<(), TypeRegistrationError>
    where
        T: Record + Default,
        C: Codec<T>,
    {
        self.register_descriptor(RecordDescriptor::new::<T, C>(type_name, codec))
    }

    /// Registers a prepared descriptor after running its codec self-check.
    ///
    /// # Errors
    ///
    /// Returns [`TypeRegistrationError::SelfCheck`] when the zero value does
    /// not round-trip, or a registry error on duplicate name / frozen registry.
    pub fn register_descriptor(
        &mut self,
        descriptor: RecordDescriptor,
    ) -> Result<(), TypeRegistrationError> {
        if self.inner.is_frozen() {
            return Err(RegistryError::Frozen {
                kind: self.inner.kind(),
                name: descriptor.type_name().to_string(),
            }
            .into());
        }
        descriptor
            .self_check()
            .map_err(|source| TypeRegistrationError::SelfCheck {
                type_name: descriptor.type_name().to_string(),
                source,
            })?;
        let name = descriptor.type_name().to_string();
        self.inner.register(name.clone(), descriptor)?;
        tracing::debug!(type_name = %name, "record type registered");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown type name.
    pub fn lookup(&self, type_name: &str) -> Result<&RecordDescriptor, RegistryError> {
        self.inner.lookup(type_name)
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

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::codec::{JsonCodec, MsgPackCodec};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    struct Feedback {
        content: String,
        is_negative: bool,
        tags: Vec<String>,
    }

    /// Serializes `count` but never reads it back, so zero values with a
    /// non-default count cannot round-trip.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Lossy {
        #[serde(skip_deserializing, default)]
        count: u32,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Required {
        id: u64,
    }

    #[test]
    fn register_and_lookup_descriptor() {
        let mut types = TypeRegistry::new();
        types
            .register::<Feedback, _>("feedback.v1", JsonCodec)
            .unwrap();

        let descriptor = types.lookup("feedback.v1").unwrap();
        assert_eq!(descriptor.type_name(), "feedback.v1");
        assert_eq!(descriptor.codec_name(), "json");
        assert_eq!(descriptor.record_type(), TypeId::of::<Feedback>());
    }

    #[test]
    fn duplicate_type_name_conflicts() {
        let mut types = TypeRegistry::new();
        types
            .register::<Feedback, _>("feedback.v1", JsonCodec)
            .unwrap();
        let err = types
            .register::<Feedback, _>("feedback.v1", MsgPackCodec)
            .unwrap_err();

        assert!(matches!(
            err,
            TypeRegistrationError::Registry(RegistryError::Conflict { .. })
        ));
        assert_eq!(types.lookup("feedback.v1").unwrap().codec_name(), "json");
    }

    #[test]
    fn self_check_failure_rejects_registration() {
        let mut types = TypeRegistry::new();
        let descriptor =
            RecordDescriptor::with_builder("lossy.v1", JsonCodec, || Lossy { count: 3 });
        let err = types.register_descriptor(descriptor).unwrap_err();

        assert!(matches!(err, TypeRegistrationError::SelfCheck { ref type_name, .. } if type_name == "lossy.v1"));
        assert!(types.is_empty());
    }

    #[test]
    fn frozen_type_registry_rejects_registration() {
        let mut types = TypeRegistry::new();
        types.freeze();
        let err = types
            .register::<Feedback, _>("feedback.v1", JsonCodec)
            .unwrap_err();
        assert!(matches!(
            err,
            TypeRegistrationError::Registry(RegistryError::Frozen { .. })
        ));
    }

    #[test]
    fn empty_body_decodes_as_default() {
        let descriptor = RecordDescriptor::new::<Feedback, _>("feedback.v1", JsonCodec);
        let record = descriptor.decode(b"").unwrap();
        let feedback = record.downcast::<Feedback>().unwrap();
        assert_eq!(*feedback, Feedback::default());
    }

    #[test]
    fn empty_body_decodes_as_builder_value() {
        let descriptor =
            RecordDescriptor::with_builder("required.v1", JsonCodec, || Required { id: 7 });
        let record = descriptor.decode(b"").unwrap();
        assert_eq!(*record.downcast::<Required>().unwrap(), Required { id: 7 });

        // A non-empty body still has to carry the mandatory fields.
        assert!(matches!(
            descriptor.decode(b"{}"),
            Err(CodecError::Decode { .. })
        ));
    }

    #[test]
    fn encode_rejects_foreign_record() {
        let descriptor = RecordDescriptor::new::<Feedback, _>("feedback.v1", JsonCodec);
        let err = descriptor.encode(&42_u32).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn decode_then_encode_preserves_fields() {
        let descriptor = RecordDescriptor::new::<Feedback, _>("feedback.v1", MsgPackCodec);
        let original = Feedback {
            content: "great".to_string(),
            is_negative: false,
            tags: vec!["a".to_string()],
        };
        let bytes = rmp_serde::to_vec_named(&original).unwrap();
        let record = descriptor.decode(&bytes).unwrap();
        let encoded = descriptor.encode(record.as_ref()).unwrap();
        let back: Feedback = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn zero_value_uses_builder() {
        let descriptor = RecordDescriptor::new::<Feedback, _>("feedback.v1", JsonCodec);
        let zero = descriptor.zero_value().downcast::<Feedback>().unwrap();
        assert_eq!(*zero, Feedback::default());
        assert!(descriptor.self_check().is_ok());
    }
}
