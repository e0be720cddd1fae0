use serde_json::{json, Map, Value};

use super::DataType;
use crate::error::{Result, SchemaError};
use crate::registry::TypeRegistry;

/// Ordered sequences. `items` is either one typedef shared by every
/// element or one typedef per position.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayType;

impl DataType for ArrayType {
    fn name(&self) -> &'static str {
        "array"
    }

    fn description(&self) -> &'static str {
        "A container of ordered values."
    }

    fn properties(&self) -> &'static [&'static str] {
        &["type", "title", "items"]
    }

    fn metadata_properties(&self) -> &'static [&'static str] {
        &["type", "items"]
    }

    fn extract_properties(&self) -> &'static [&'static str] {
        &["type", "title", "items"]
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_array()
    }

    fn normalize(
        &self,
        value: Value,
        typedef: &Map<String, Value>,
        registry: &TypeRegistry,
    ) -> Result<Value> {
        let Some(items) = typedef.get("items") else {
            return Ok(self.coerce(value));
        };
        let mut elements = match self.coerce(value) {
            Value::Array(elements) => elements,
            other => return Ok(other),
        };

        if let Value::Array(items) = items {
            let present = elements.len();
            elements = elements
                .into_iter()
                .zip(items.iter().map(Some).chain(std::iter::repeat(None)))
                .map(|(element, item)| match item {
                    Some(item) => registry.normalize(element, as_typedef("items", item)?),
                    None => Ok(element),
                })
                .collect::<Result<_>>()?;
            // Trailing positions are filled only while each declares a default.
            for item in items.iter().skip(present) {
                let item = as_typedef("items", item)?;
                let Some(default) = item.get("default") else {
                    break;
                };
                elements.push(registry.normalize(default.clone(), item)?);
            }
        } else {
            let item = as_typedef("items", items)?;
            elements = elements
                .into_iter()
                .map(|element| registry.normalize(element, item))
                .collect::<Result<_>>()?;
        }
        Ok(Value::Array(elements))
    }

    fn instance_schema(
        &self,
        typedef: &Map<String, Value>,
        registry: &TypeRegistry,
    ) -> Result<Value> {
        match typedef.get("items") {
            None => Ok(json!({ "type": "array" })),
            Some(Value::Array(items)) => {
                let prefix = items
                    .iter()
                    .map(|item| registry.instance_schema(as_typedef("items", item)?))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!({
                    "type": "array",
                    "prefixItems": prefix,
                    "minItems": items.len(),
                    "maxItems": items.len(),
                }))
            }
            Some(item) => Ok(json!({
                "type": "array",
                "items": registry.instance_schema(as_typedef("items", item)?)?,
            })),
        }
    }
}

/// String-keyed maps. `properties` holds one typedef per member.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectType;

impl DataType for ObjectType {
    fn name(&self) -> &'static str {
        "object"
    }

    fn description(&self) -> &'static str {
        "A container mapping between keys and values."
    }

    fn properties(&self) -> &'static [&'static str] {
        &["type", "title", "properties"]
    }

    fn metadata_properties(&self) -> &'static [&'static str] {
        &["type", "properties"]
    }

    fn extract_properties(&self) -> &'static [&'static str] {
        &["type", "title", "properties"]
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_object()
    }

    fn normalize(
        &self,
        value: Value,
        typedef: &Map<String, Value>,
        registry: &TypeRegistry,
    ) -> Result<Value> {
        let Some(members) = typedef.get("properties") else {
            return Ok(self.coerce(value));
        };
        let members = as_typedef("properties", members)?;
        let mut map = match self.coerce(value) {
            Value::Object(map) => map,
            other => return Ok(other),
        };

        for (key, member) in members {
            let member = as_typedef("properties", member)?;
            let current = match map.remove(key) {
                Some(current) => current,
                None => match member.get("default") {
                    Some(default) => default.clone(),
                    None => continue,
                },
            };
            map.insert(key.clone(), registry.normalize(current, member)?);
        }
        Ok(Value::Object(map))
    }

    fn instance_schema(
        &self,
        typedef: &Map<String, Value>,
        registry: &TypeRegistry,
    ) -> Result<Value> {
        let Some(members) = typedef.get("properties") else {
            return Ok(json!({ "type": "object" }));
        };
        let members = as_typedef("properties", members)?;

        let mut properties = Map::new();
        for (key, member) in members {
            properties.insert(
                key.clone(),
                registry.instance_schema(as_typedef("properties", member)?)?,
            );
        }
        let required: Vec<&String> = members.keys().collect();
        Ok(json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }))
    }
}

pub(crate) fn as_typedef<'a>(property: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SchemaError::validation(property, "expected a typedef object"))
}
