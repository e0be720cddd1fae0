use serde_json::{json, Map, Value};

use super::DataType;
use crate::error::Result;
use crate::registry::TypeRegistry;

/// Raw byte strings. Channels typed as plain `bytes` accept unframed data.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesType;

impl DataType for BytesType {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn description(&self) -> &'static str {
        "A sequence of bytes."
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_string()
    }

    fn instance_schema(&self, _: &Map<String, Value>, _: &TypeRegistry) -> Result<Value> {
        Ok(json!({ "type": "string" }))
    }
}

/// Unicode text.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeType;

impl DataType for UnicodeType {
    fn name(&self) -> &'static str {
        "unicode"
    }

    fn description(&self) -> &'static str {
        "A unicode string."
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_string()
    }

    fn instance_schema(&self, _: &Map<String, Value>, _: &TypeRegistry) -> Result<Value> {
        Ok(json!({ "type": "string" }))
    }
}
