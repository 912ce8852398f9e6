//! Record codecs: paired decode/encode for one strongly-typed record.
//!
//! A [`Codec`] is generic over the record type so application code stays
//! fully typed. The type registry erases it behind
//! [`RecordDescriptor`](crate::record::RecordDescriptor).

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors produced while decoding or encoding a record.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{codec} decode failed: {message}")]
    Decode { codec: &'static str, message: String },
    #[error("{codec} encode failed: {message}")]
    Encode { codec: &'static str, message: String },
    #[error("{codec} round-trip of `{type_name}` zero value did not reproduce the original")]
    RoundTrip {
        codec: &'static str,
        type_name: String,
    },
    #[error("record is not a `{expected}`")]
    TypeMismatch { expected: &'static str },
}

/// Marker for types usable as manifest records.
///
/// Blanket-implemented for every serde type that can be compared for the
/// registration round-trip check and moved across request tasks.
pub trait Record:
    Serialize + DeserializeOwned + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
}

impl<T> Record for T where
    T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
}

/// Decode/encode pair for records of type `T`.
pub trait Codec<T>: Send + Sync + 'static {
    /// Short codec label used in logs and errors (e.g. `"json"`).
    fn name(&self) -> &'static str;

    /// Decodes `bytes` into a record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] on malformed or mistyped input.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Encodes `record` into bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the record cannot be serialized.
    fn encode(&self, record: &T) -> Result<Vec<u8>, CodecError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// JSON codec backed by `serde_json`.
///
/// Strictness about unknown fields is a property of the record type
/// (`#[serde(deny_unknown_fields)]`), not of the codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Record> Codec<T> for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: "json",
            message: e.to_string(),
        })
    }

    fn encode(&self, record: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(record).map_err(|e| CodecError::Encode {
            codec: "json",
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// MsgPackCodec
// ---------------------------------------------------------------------------

/// `MsgPack` codec backed by `rmp-serde`. Structs are written as maps keyed by
/// field name so partially-populated documents decode with serde defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl<T: Record> Codec<T> for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: "msgpack",
            message: e.to_string(),
        })
    }

    fn encode(&self, record: &T) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(record).map_err(|e| CodecError::Encode {
            codec: "msgpack",
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
