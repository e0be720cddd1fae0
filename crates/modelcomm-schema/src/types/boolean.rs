use serde_json::{json, Map, Value};

use super::DataType;
use crate::error::Result;
use crate::registry::TypeRegistry;

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanType;

impl DataType for BooleanType {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn description(&self) -> &'static str {
        "A boolean value."
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_boolean()
    }

    fn instance_schema(&self, _: &Map<String, Value>, _: &TypeRegistry) -> Result<Value> {
        Ok(json!({ "type": "boolean" }))
    }
}
