//! Typed, schema-validated message codec for modelcomm channels.
//!
//! A typedef such as `{"type": "scalar", "subtype": "float"}` selects a
//! registered [`DataType`]; [`TypedCodec`] encodes values into
//! `(metadata, data)` pairs checked against the typedef, and
//! [`Serializer`] wraps them in wire envelopes.
//!
//! Typedefs are validated against a JSON metaschema built from the
//! registered types and properties.

pub mod codec;
pub mod error;
pub mod properties;
pub mod registry;
pub mod serializer;
pub mod types;
mod validator;

pub use codec::TypedCodec;
pub use error::{Result, SchemaError};
pub use properties::MetaschemaProperty;
pub use registry::TypeRegistry;
pub use serializer::{Message, SerializeOptions, Serializer, RESERVED_DATA_KEY};
pub use types::DataType;
