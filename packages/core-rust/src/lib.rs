//! Exodus core: registries, record codecs, transforms, and the route manifest model.

pub mod codec;
pub mod context;
pub mod manifest;
pub mod record;
pub mod registry;
pub mod transform;

pub use codec::{Codec, CodecError, JsonCodec, MsgPackCodec, Record};
pub use context::{role_satisfied, Principal};
pub use manifest::{Manifest, ManifestError, ManifestRoute};
pub use record::{DynRecord, RecordDescriptor, TypeRegistrationError, TypeRegistry};
pub use registry::{Registry, RegistryError};
pub use transform::{Transform, TransformError, TransformKey, TransformRegistry};
