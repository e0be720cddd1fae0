//! Builtin data types.
//!
//! Each type tag maps to one [`DataType`] implementation; the registry
//! selects it from a typedef's `type` property.

mod boolean;
mod container;
pub(crate) mod scalar;
mod string;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::registry::TypeRegistry;

pub use boolean::BooleanType;
pub use container::{ArrayType, ObjectType};
pub use scalar::ScalarType;
pub use string::{BytesType, UnicodeType};

/// Codec behaviour for one type tag.
///
/// Values are JSON values. The encoded data segment is the JSON
/// serialization of [`encode_data`](Self::encode_data).
pub trait DataType: Send + Sync {
    /// Type tag used in typedefs and metadata.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Schema properties encoded into metadata, in encode order.
    fn properties(&self) -> &'static [&'static str] {
        &["type", "title"]
    }

    /// Properties a typedef for this type must declare.
    fn definition_properties(&self) -> &'static [&'static str] {
        &["type"]
    }

    /// Properties encoded metadata for this type must carry.
    fn metadata_properties(&self) -> &'static [&'static str] {
        &["type"]
    }

    /// Properties kept when a typedef is extracted from received metadata.
    fn extract_properties(&self) -> &'static [&'static str] {
        &["type", "title"]
    }

    /// True when `value` is one of this type's native representations.
    fn accepts(&self, value: &Value) -> bool;

    /// Nudge a value toward an accepted representation.
    fn coerce(&self, value: Value) -> Value {
        value
    }

    /// Fill defaults declared by `typedef` into `value` and coerce it.
    /// Containers descend into their members through the registry.
    fn normalize(
        &self,
        value: Value,
        _typedef: &Map<String, Value>,
        _registry: &TypeRegistry,
    ) -> Result<Value> {
        Ok(self.coerce(value))
    }

    /// Type-specific adjustment applied after validation and after decode.
    fn transform(&self, value: Value, _typedef: &Map<String, Value>) -> Value {
        value
    }

    /// JSON representation written to the data segment.
    fn encode_data(&self, value: &Value, _metadata: &Map<String, Value>) -> Result<Value> {
        Ok(value.clone())
    }

    /// Inverse of [`encode_data`](Self::encode_data).
    fn decode_data(&self, data: Value, _metadata: &Map<String, Value>) -> Result<Value> {
        Ok(data)
    }

    /// Standard JSON Schema that instances described by `typedef` satisfy.
    fn instance_schema(
        &self,
        typedef: &Map<String, Value>,
        registry: &TypeRegistry,
    ) -> Result<Value>;
}

impl std::fmt::Debug for dyn DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataType")
            .field("name", &self.name())
            .finish()
    }
}

/// Builtin types in inference order.
pub(crate) fn builtin() -> Vec<Arc<dyn DataType>> {
    vec![
        Arc::new(BooleanType),
        Arc::new(ScalarType),
        Arc::new(UnicodeType),
        Arc::new(BytesType),
        Arc::new(ArrayType),
        Arc::new(ObjectType),
    ]
}
