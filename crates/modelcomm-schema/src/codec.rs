use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::registry::{required_schema, TypeRegistry};
use crate::types::DataType;
use crate::validator::validate_with;

/// A typedef bound to its registered data type.
///
/// `encode` runs: normalize, validate against the typedef, transform, encode
/// the metadata through each property encoder, encode the data, then
/// re-check the metadata against the typedef. `decode` is the inverse.
#[derive(Debug, Clone)]
pub struct TypedCodec {
    registry: Arc<TypeRegistry>,
    data_type: Arc<dyn DataType>,
    typedef: Map<String, Value>,
}

impl TypedCodec {
    /// Bind a typedef, which must name a registered type and pass the
    /// metaschema.
    pub fn new(registry: Arc<TypeRegistry>, typedef: Value) -> Result<Self> {
        let Value::Object(typedef) = typedef else {
            return Err(SchemaError::validation("typedef", "typedef must be an object"));
        };
        let name = typedef
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::validation("type", "typedef has no type"))?;
        let data_type = registry.get_type(name)?;
        validate_definition(&registry, data_type.as_ref(), &typedef)?;
        Ok(Self {
            registry,
            data_type,
            typedef,
        })
    }

    pub fn typedef(&self) -> &Map<String, Value> {
        &self.typedef
    }

    pub fn type_name(&self) -> &'static str {
        self.data_type.name()
    }

    pub fn data_type(&self) -> &Arc<dyn DataType> {
        &self.data_type
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// True when the typedef is exactly `{"type": "bytes"}`.
    pub fn is_generic_bytes(&self) -> bool {
        self.typedef.len() == 1 && self.type_name() == "bytes"
    }

    /// Merge new properties into the typedef. The `type` may not change.
    pub fn update_typedef(&mut self, updates: Map<String, Value>) -> Result<()> {
        if let Some(requested) = updates.get("type").and_then(Value::as_str) {
            if requested != self.type_name() {
                return Err(SchemaError::TypeMismatch {
                    current: self.type_name().to_string(),
                    requested: requested.to_string(),
                });
            }
        }
        let mut typedef = self.typedef.clone();
        typedef.extend(updates);
        validate_definition(&self.registry, self.data_type.as_ref(), &typedef)?;
        self.typedef = typedef;
        Ok(())
    }

    /// Validate a typedef for this codec's type.
    pub fn validate_definition(&self, typedef: &Map<String, Value>) -> Result<()> {
        validate_definition(&self.registry, self.data_type.as_ref(), typedef)
    }

    /// Validate encoded metadata for this codec's type.
    pub fn validate_metadata(&self, metadata: &Map<String, Value>) -> Result<()> {
        validate_metadata(&self.registry, self.data_type.as_ref(), metadata)
    }

    /// Check encoded metadata against the bound typedef.
    pub fn check_encoded(&self, metadata: &Map<String, Value>) -> Result<()> {
        check_encoded(
            &self.registry,
            self.data_type.as_ref(),
            metadata,
            Some(&self.typedef),
        )
    }

    /// Check a decoded value against the bound typedef.
    pub fn check_decoded(&self, value: &Value) -> Result<()> {
        check_decoded(
            &self.registry,
            self.data_type.as_ref(),
            value,
            Some(&self.typedef),
        )
    }

    /// Encode the typedef of `value`.
    pub fn encode_type(&self, value: &Value) -> Result<Map<String, Value>> {
        self.registry
            .encode_type(self.data_type.as_ref(), value, &self.typedef)
    }

    /// Keep only the properties this type extracts from received metadata.
    pub fn extract_typedef(&self, metadata: &Map<String, Value>) -> Result<Map<String, Value>> {
        let keep = self.data_type.extract_properties();
        let typedef: Map<String, Value> = metadata
            .iter()
            .filter(|(key, _)| keep.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.validate_definition(&typedef)?;
        Ok(typedef)
    }

    /// Encode a value into `(metadata, data)`.
    pub fn encode(&self, value: Value) -> Result<(Map<String, Value>, Value)> {
        let data_type = self.data_type.as_ref();
        let value = self.registry.normalize(value, &self.typedef)?;
        self.check_decoded(&value)?;
        let value = data_type.transform(value, &self.typedef);
        let metadata = self.encode_type(&value)?;
        let data = data_type.encode_data(&value, &metadata)?;
        self.check_encoded(&metadata)?;
        Ok((metadata, data))
    }

    /// Decode `(metadata, data)` into a value.
    ///
    /// A codec bound to exactly `{"type": "bytes"}` that receives metadata
    /// for a different registered type decodes with that type instead.
    pub fn decode(&self, metadata: &Map<String, Value>, data: Value) -> Result<Value> {
        if let Err(err) = self.check_encoded(metadata) {
            let declared = metadata.get("type").and_then(Value::as_str);
            return match declared {
                Some(name) if self.is_generic_bytes() && name != "bytes" => {
                    debug!(declared = name, "bytes channel decoding typed message");
                    let data_type = self.registry.get_type(name)?;
                    decode_value(&self.registry, data_type.as_ref(), metadata, data, None)
                }
                _ => Err(err),
            };
        }
        decode_value(
            &self.registry,
            self.data_type.as_ref(),
            metadata,
            data,
            Some(&self.typedef),
        )
    }
}

fn validate_definition(
    registry: &TypeRegistry,
    data_type: &dyn DataType,
    typedef: &Map<String, Value>,
) -> Result<()> {
    registry.validate_typedef("typedef", typedef)?;
    validate_with(
        "typedef",
        &Value::Object(typedef.clone()),
        &required_schema(data_type, data_type.definition_properties()),
    )
}

fn validate_metadata(
    registry: &TypeRegistry,
    data_type: &dyn DataType,
    metadata: &Map<String, Value>,
) -> Result<()> {
    registry.validate_typedef("metadata", metadata)?;
    validate_with(
        "metadata",
        &Value::Object(metadata.clone()),
        &required_schema(data_type, data_type.metadata_properties()),
    )
}

fn check_encoded(
    registry: &TypeRegistry,
    data_type: &dyn DataType,
    metadata: &Map<String, Value>,
    typedef: Option<&Map<String, Value>>,
) -> Result<()> {
    validate_metadata(registry, data_type, metadata)?;
    let Some(typedef) = typedef else {
        return Ok(());
    };
    validate_definition(registry, data_type, typedef)?;
    match registry.compare_schema(metadata, typedef).into_iter().next() {
        Some((property, message)) => Err(SchemaError::Validation { property, message }),
        None => Ok(()),
    }
}

fn check_decoded(
    registry: &TypeRegistry,
    data_type: &dyn DataType,
    value: &Value,
    typedef: Option<&Map<String, Value>>,
) -> Result<()> {
    if !data_type.accepts(value) {
        return Err(SchemaError::validation(
            "type",
            format!("{value} is not a valid '{}'", data_type.name()),
        ));
    }
    let Some(typedef) = typedef else {
        return Ok(());
    };
    validate_definition(registry, data_type, typedef)?;
    validate_with("instance", value, &registry.instance_schema(typedef)?)
}

fn decode_value(
    registry: &TypeRegistry,
    data_type: &dyn DataType,
    metadata: &Map<String, Value>,
    data: Value,
    typedef: Option<&Map<String, Value>>,
) -> Result<Value> {
    if typedef.is_none() {
        check_encoded(registry, data_type, metadata, None)?;
    }
    let value = data_type.decode_data(data, metadata)?;
    check_decoded(registry, data_type, &value, typedef)?;
    let empty = Map::new();
    Ok(data_type.transform(value, typedef.unwrap_or(&empty)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn codec(typedef: Value) -> TypedCodec {
        TypedCodec::new(Arc::new(TypeRegistry::new().unwrap()), typedef).unwrap()
    }

    #[test]
    fn float_scalar_metadata() {
        let codec = codec(json!({ "type": "scalar", "subtype": "float" }));
        let (metadata, data) = codec.encode(json!(3.14)).unwrap();

        assert_eq!(metadata["type"], json!("scalar"));
        assert_eq!(metadata["subtype"], json!("float"));
        assert_eq!(data, json!(3.14));
    }

    #[test]
    fn round_trip_values() {
        let cases = [
            (json!({ "type": "scalar", "subtype": "int" }), json!(-42)),
            (json!({ "type": "scalar", "subtype": "uint", "precision": 16 }), json!(6000)),
            (json!({ "type": "boolean" }), json!(true)),
            (json!({ "type": "unicode" }), json!("héllo")),
            (json!({ "type": "bytes" }), json!("raw")),
            (
                json!({ "type": "array", "items": { "type": "scalar", "subtype": "float" } }),
                json!([1.5, 2.5]),
            ),
            (
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "unicode" },
                        "ok": { "type": "boolean" }
                    }
                }),
                json!({ "name": "a", "ok": false }),
            ),
        ];

        for (typedef, value) in cases {
            let codec = codec(typedef.clone());
            let (metadata, data) = codec.encode(value.clone()).unwrap();
            let decoded = codec.decode(&metadata, data).unwrap();
            assert_eq!(decoded, value, "typedef {typedef}");
        }
    }

    #[test]
    fn revalidating_encoded_metadata_is_idempotent() {
        let codec = codec(json!({ "type": "scalar", "subtype": "int" }));
        let (metadata, _) = codec.encode(json!(7)).unwrap();
        codec.check_encoded(&metadata).unwrap();
        codec.check_encoded(&metadata).unwrap();
    }

    #[test]
    fn encode_fills_declared_member_defaults() {
        let codec = codec(json!({
            "type": "object",
            "properties": {
                "label": { "type": "unicode" },
                "count": { "type": "scalar", "subtype": "int", "default": 5 }
            }
        }));
        let (metadata, data) = codec.encode(json!({ "label": "x" })).unwrap();
        assert_eq!(data, json!({ "label": "x", "count": 5 }));
        assert_eq!(metadata["properties"]["count"]["type"], json!("scalar"));

        let missing = codec.encode(json!({ "count": 1 }));
        assert!(missing.is_err());
    }

    #[test]
    fn wrong_value_rejected() {
        let codec = codec(json!({ "type": "boolean" }));
        let err = codec.encode(json!("yes")).unwrap_err();
        assert!(matches!(err, SchemaError::Validation { property, .. } if property == "type"));
    }

    #[test]
    fn precision_overflow_rejected() {
        let codec = codec(json!({ "type": "scalar", "subtype": "uint", "precision": 8 }));
        assert!(codec.encode(json!(300)).is_err());
    }

    #[test]
    fn typedef_must_pass_metaschema() {
        let registry = Arc::new(TypeRegistry::new().unwrap());
        assert!(matches!(
            TypedCodec::new(registry.clone(), json!({ "type": "tensor" })),
            Err(SchemaError::UnknownType(_))
        ));
        assert!(TypedCodec::new(registry.clone(), json!({ "type": "scalar" })).is_err());
        let complex = json!({ "type": "scalar", "subtype": "complex" });
        assert!(TypedCodec::new(registry, complex).is_err());
    }

    #[test]
    fn update_typedef_keeps_type() {
        let mut codec = codec(json!({ "type": "scalar", "subtype": "int" }));
        let mut updates = Map::new();
        updates.insert("units".to_string(), json!("kg"));
        codec.update_typedef(updates).unwrap();
        assert_eq!(codec.typedef()["units"], json!("kg"));

        let mut updates = Map::new();
        updates.insert("type".to_string(), json!("boolean"));
        assert!(matches!(
            codec.update_typedef(updates),
            Err(SchemaError::TypeMismatch { current, requested })
                if current == "scalar" && requested == "boolean"
        ));
    }

    #[test]
    fn units_mismatch_detected_on_decode() {
        let sender = codec(json!({ "type": "scalar", "subtype": "float", "units": "m" }));
        let receiver = codec(json!({ "type": "scalar", "subtype": "float", "units": "s" }));
        let (metadata, data) = sender.encode(json!(1.5)).unwrap();

        let err = receiver.decode(&metadata, data).unwrap_err();
        assert!(matches!(err, SchemaError::Validation { property, .. } if property == "units"));
    }

    #[test]
    fn bytes_channel_decodes_typed_metadata() {
        let sender = codec(json!({ "type": "scalar", "subtype": "int" }));
        let receiver = codec(json!({ "type": "bytes" }));
        let (metadata, data) = sender.encode(json!(12)).unwrap();

        assert_eq!(receiver.decode(&metadata, data).unwrap(), json!(12));
    }

    #[test]
    fn titled_bytes_channel_does_not_dispatch() {
        let sender = codec(json!({ "type": "scalar", "subtype": "int" }));
        let receiver = codec(json!({ "type": "bytes", "title": "blob" }));
        let (metadata, data) = sender.encode(json!(12)).unwrap();

        assert!(receiver.decode(&metadata, data).is_err());
    }

    #[test]
    fn extract_typedef_drops_envelope_keys() {
        let codec = codec(json!({ "type": "scalar", "subtype": "int" }));
        let (mut metadata, _) = codec.encode(json!(5)).unwrap();
        metadata.insert("size".to_string(), json!(1));
        metadata.insert("id".to_string(), json!("abc"));

        let typedef = codec.extract_typedef(&metadata).unwrap();
        assert_eq!(
            Value::Object(typedef),
            json!({ "type": "scalar", "subtype": "int", "precision": 8 })
        );
    }
}
