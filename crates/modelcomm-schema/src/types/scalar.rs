use serde_json::{json, Map, Number, Value};

use super::DataType;
use crate::error::Result;
use crate::registry::TypeRegistry;

/// Scalar subtypes.
pub const SUBTYPES: [&str; 3] = ["int", "uint", "float"];

/// Numeric scalars with an optional `subtype`, bit `precision` and `units`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarType;

impl DataType for ScalarType {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn description(&self) -> &'static str {
        "A scalar value with or without units."
    }

    fn properties(&self) -> &'static [&'static str] {
        &["type", "title", "subtype", "precision", "units"]
    }

    fn definition_properties(&self) -> &'static [&'static str] {
        &["type", "subtype"]
    }

    fn metadata_properties(&self) -> &'static [&'static str] {
        &["type", "subtype", "precision"]
    }

    fn extract_properties(&self) -> &'static [&'static str] {
        &["type", "title", "subtype", "precision", "units"]
    }

    fn accepts(&self, value: &Value) -> bool {
        value.is_number()
    }

    /// Single-element arrays collapse to their element.
    fn coerce(&self, value: Value) -> Value {
        match value {
            Value::Array(mut items) if items.len() == 1 => items.remove(0),
            other => other,
        }
    }

    fn transform(&self, value: Value, typedef: &Map<String, Value>) -> Value {
        let Value::Number(number) = &value else {
            return value;
        };
        match typedef.get("subtype").and_then(Value::as_str) {
            Some("float") if !number.is_f64() => number
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(value),
            Some("int") | Some("uint") if number.is_f64() => match number.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Value::from(f as i64)
                }
                _ => value,
            },
            _ => value,
        }
    }

    fn instance_schema(&self, typedef: &Map<String, Value>, _: &TypeRegistry) -> Result<Value> {
        let precision = typedef.get("precision").and_then(Value::as_u64);
        let schema = match typedef.get("subtype").and_then(Value::as_str) {
            Some("int") => match precision {
                Some(bits @ 1..=63) => {
                    let half = 1i64 << (bits - 1);
                    json!({ "type": "integer", "minimum": -half, "maximum": half - 1 })
                }
                _ => json!({ "type": "integer" }),
            },
            Some("uint") => match precision {
                Some(bits @ 1..=63) => {
                    json!({ "type": "integer", "minimum": 0, "maximum": (1u64 << bits) - 1 })
                }
                _ => json!({ "type": "integer", "minimum": 0 }),
            },
            _ => json!({ "type": "number" }),
        };
        Ok(schema)
    }
}

/// Smallest standard bit width holding an integer value.
pub(crate) fn integer_bits(number: &Number) -> Option<u64> {
    const WIDTHS: [u32; 4] = [8, 16, 32, 64];
    if let Some(v) = number.as_i64() {
        if v < 0 {
            return WIDTHS
                .iter()
                .find(|&&bits| bits == 64 || v >= -(1i64 << (bits - 1)))
                .map(|&bits| u64::from(bits));
        }
    }
    let v = number.as_u64()?;
    WIDTHS
        .iter()
        .find(|&&bits| bits == 64 || v < (1u64 << bits))
        .map(|&bits| u64::from(bits))
}
