//! Schema properties: how each typedef key is encoded from a value and
//! compared against a declared typedef.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::registry::TypeRegistry;
use crate::types::scalar::{integer_bits, SUBTYPES};

/// One typedef/metadata key.
pub trait MetaschemaProperty: Send + Sync {
    fn name(&self) -> &'static str;

    /// Metaschema fragment constraining this key in a typedef.
    fn schema(&self) -> Value;

    /// Encoded value of this property for `value`, seeded by the typedef's
    /// declared value when present. `None` leaves the key out.
    fn encode(
        &self,
        value: &Value,
        declared: Option<&Value>,
        registry: &TypeRegistry,
    ) -> Result<Option<Value>>;

    /// Check an encoded value against the declared one.
    fn compare(
        &self,
        encoded: &Value,
        declared: &Value,
        _registry: &TypeRegistry,
    ) -> std::result::Result<(), String> {
        if encoded == declared {
            Ok(())
        } else {
            Err(format!("{encoded} is not {declared}"))
        }
    }

    /// False for informational properties that are never compared.
    fn validates(&self) -> bool {
        true
    }

    /// True when registering this property may replace an existing one.
    fn replaces_existing(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn MetaschemaProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaschemaProperty")
            .field("name", &self.name())
            .finish()
    }
}

pub(crate) fn builtin() -> Vec<Arc<dyn MetaschemaProperty>> {
    vec![
        Arc::new(TypeProperty),
        Arc::new(TitleProperty),
        Arc::new(SubtypeProperty),
        Arc::new(PrecisionProperty),
        Arc::new(UnitsProperty),
        Arc::new(ItemsProperty),
        Arc::new(PropertiesProperty),
    ]
}

/// `type`: the registered type tag. Filled in by the encoder itself.
#[derive(Debug, Clone, Copy)]
pub struct TypeProperty;

impl MetaschemaProperty for TypeProperty {
    fn name(&self) -> &'static str {
        "type"
    }

    // Replaced by the registry with the enum of registered names.
    fn schema(&self) -> Value {
        json!({ "type": "string" })
    }

    fn encode(
        &self,
        _: &Value,
        declared: Option<&Value>,
        _: &TypeRegistry,
    ) -> Result<Option<Value>> {
        Ok(declared.cloned())
    }
}

/// `title`: copied from the typedef, never validated.
#[derive(Debug, Clone, Copy)]
pub struct TitleProperty;

impl MetaschemaProperty for TitleProperty {
    fn name(&self) -> &'static str {
        "title"
    }

    fn schema(&self) -> Value {
        json!({ "type": "string" })
    }

    fn encode(
        &self,
        _: &Value,
        declared: Option<&Value>,
        _: &TypeRegistry,
    ) -> Result<Option<Value>> {
        Ok(declared.cloned())
    }

    fn validates(&self) -> bool {
        false
    }

    fn replaces_existing(&self) -> bool {
        true
    }
}

/// `subtype`: scalar number kind.
#[derive(Debug, Clone, Copy)]
pub struct SubtypeProperty;

impl MetaschemaProperty for SubtypeProperty {
    fn name(&self) -> &'static str {
        "subtype"
    }

    fn schema(&self) -> Value {
        json!({ "enum": SUBTYPES })
    }

    fn encode(
        &self,
        value: &Value,
        declared: Option<&Value>,
        _: &TypeRegistry,
    ) -> Result<Option<Value>> {
        let Some(number) = value.as_number() else {
            return Ok(None);
        };
        let subtype = if number.is_f64() {
            "float"
        } else if number.as_i64().is_none() {
            "uint"
        } else {
            match declared.and_then(Value::as_str) {
                Some("uint") if number.as_u64().is_some() => "uint",
                _ => "int",
            }
        };
        Ok(Some(json!(subtype)))
    }
}

/// `precision`: bit width. Encoded precision must not exceed the declared one.
#[derive(Debug, Clone, Copy)]
pub struct PrecisionProperty;

impl MetaschemaProperty for PrecisionProperty {
    fn name(&self) -> &'static str {
        "precision"
    }

    fn schema(&self) -> Value {
        json!({ "type": "integer", "minimum": 1 })
    }

    fn encode(
        &self,
        value: &Value,
        declared: Option<&Value>,
        _: &TypeRegistry,
    ) -> Result<Option<Value>> {
        let Some(number) = value.as_number() else {
            return Ok(None);
        };
        let declared = declared.and_then(Value::as_u64);
        let needed = integer_bits(number).unwrap_or(64);
        let bits = match declared {
            Some(declared) if number.is_f64() || declared >= needed => declared,
            _ => needed,
        };
        Ok(Some(json!(bits)))
    }

    fn compare(
        &self,
        encoded: &Value,
        declared: &Value,
        _: &TypeRegistry,
    ) -> std::result::Result<(), String> {
        match (encoded.as_u64(), declared.as_u64()) {
            (Some(encoded), Some(declared)) if encoded <= declared => Ok(()),
            (Some(encoded), Some(declared)) => {
                Err(format!("precision {encoded} exceeds declared {declared}"))
            }
            _ => Err(format!("cannot compare precision {encoded} with {declared}")),
        }
    }
}

/// `units`: free-form unit string, carried from the typedef.
#[derive(Debug, Clone, Copy)]
pub struct UnitsProperty;

impl MetaschemaProperty for UnitsProperty {
    fn name(&self) -> &'static str {
        "units"
    }

    fn schema(&self) -> Value {
        json!({ "type": "string" })
    }

    fn encode(
        &self,
        _: &Value,
        declared: Option<&Value>,
        _: &TypeRegistry,
    ) -> Result<Option<Value>> {
        Ok(declared.cloned())
    }
}

/// `items`: encoded as one typedef per array element.
#[derive(Debug, Clone, Copy)]
pub struct ItemsProperty;

impl MetaschemaProperty for ItemsProperty {
    fn name(&self) -> &'static str {
        "items"
    }

    fn schema(&self) -> Value {
        json!({
            "anyOf": [
                { "$ref": "#" },
                { "type": "array", "items": { "$ref": "#" } }
            ]
        })
    }

    fn encode(
        &self,
        value: &Value,
        declared: Option<&Value>,
        registry: &TypeRegistry,
    ) -> Result<Option<Value>> {
        let Some(elements) = value.as_array() else {
            return Ok(None);
        };
        let mut encoded = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            let hint = match declared {
                Some(Value::Array(per_item)) => per_item.get(index),
                other => other,
            };
            encoded.push(Value::Object(registry.encode_member(element, hint)?));
        }
        Ok(Some(Value::Array(encoded)))
    }

    fn compare(
        &self,
        encoded: &Value,
        declared: &Value,
        registry: &TypeRegistry,
    ) -> std::result::Result<(), String> {
        let Some(encoded) = encoded.as_array() else {
            return Err("encoded items is not an array".to_string());
        };
        match declared {
            Value::Array(per_item) => {
                if per_item.len() != encoded.len() {
                    return Err(format!(
                        "{} items declared but {} encoded",
                        per_item.len(),
                        encoded.len()
                    ));
                }
                for (index, (enc, dec)) in encoded.iter().zip(per_item).enumerate() {
                    compare_nested(registry, enc, dec).map_err(|e| format!("[{index}] {e}"))?;
                }
                Ok(())
            }
            shared => {
                for (index, enc) in encoded.iter().enumerate() {
                    compare_nested(registry, enc, shared).map_err(|e| format!("[{index}] {e}"))?;
                }
                Ok(())
            }
        }
    }
}

/// `properties`: encoded as one typedef per object member.
#[derive(Debug, Clone, Copy)]
pub struct PropertiesProperty;

impl MetaschemaProperty for PropertiesProperty {
    fn name(&self) -> &'static str {
        "properties"
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "additionalProperties": { "$ref": "#" } })
    }

    fn encode(
        &self,
        value: &Value,
        declared: Option<&Value>,
        registry: &TypeRegistry,
    ) -> Result<Option<Value>> {
        let Some(members) = value.as_object() else {
            return Ok(None);
        };
        let declared = declared.and_then(Value::as_object);
        let mut encoded = Map::new();
        for (key, member) in members {
            let hint = declared.and_then(|d| d.get(key));
            encoded.insert(key.clone(), Value::Object(registry.encode_member(member, hint)?));
        }
        Ok(Some(Value::Object(encoded)))
    }

    fn compare(
        &self,
        encoded: &Value,
        declared: &Value,
        registry: &TypeRegistry,
    ) -> std::result::Result<(), String> {
        let (Some(encoded), Some(declared)) = (encoded.as_object(), declared.as_object()) else {
            return Err("properties must be objects".to_string());
        };
        for (key, dec) in declared {
            let enc = encoded
                .get(key)
                .ok_or_else(|| format!("missing member '{key}'"))?;
            compare_nested(registry, enc, dec).map_err(|e| format!("{key}: {e}"))?;
        }
        Ok(())
    }
}

fn compare_nested(
    registry: &TypeRegistry,
    encoded: &Value,
    declared: &Value,
) -> std::result::Result<(), String> {
    let (Some(encoded), Some(declared)) = (encoded.as_object(), declared.as_object()) else {
        return Err("nested typedefs must be objects".to_string());
    };
    match registry.compare_schema(encoded, declared).into_iter().next() {
        Some((property, message)) => Err(format!("{property}: {message}")),
        None => Ok(()),
    }
}
