use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::properties::{self, MetaschemaProperty};
use crate::types::{self, DataType};
use crate::validator::{compile, validate_value};

/// Type-tag keyed registry of data types and schema properties.
///
/// The registry owns the metaschema every typedef is validated against;
/// its `type` enum always lists exactly the registered type names.
/// Share one registry between channels with `Arc<TypeRegistry>`.
pub struct TypeRegistry {
    types: Vec<Arc<dyn DataType>>,
    properties: BTreeMap<&'static str, Arc<dyn MetaschemaProperty>>,
    metaschema: Value,
    validator: Validator,
}

impl TypeRegistry {
    /// Create a registry holding the builtin types and properties.
    pub fn new() -> Result<Self> {
        let types = types::builtin();
        let properties: BTreeMap<_, _> = properties::builtin()
            .into_iter()
            .map(|property| (property.name(), property))
            .collect();
        let metaschema = build_metaschema(&types, &properties);
        let validator = compile(&metaschema)?;
        Ok(Self {
            types,
            properties,
            metaschema,
            validator,
        })
    }

    /// Register an additional data type.
    pub fn register_type(&mut self, data_type: Arc<dyn DataType>) -> Result<()> {
        if self.has_type(data_type.name()) {
            return Err(SchemaError::DuplicateType(data_type.name().to_string()));
        }
        let mut types = self.types.clone();
        types.push(data_type);
        self.commit(types, self.properties.clone())
    }

    /// Register a schema property. Names are unique unless the new
    /// property declares that it replaces an existing one.
    pub fn register_property(
        &mut self,
        property: Arc<dyn MetaschemaProperty>,
    ) -> Result<()> {
        let name = property.name();
        if self.properties.contains_key(name) && !property.replaces_existing() {
            return Err(SchemaError::DuplicateProperty(name.to_string()));
        }
        let mut properties = self.properties.clone();
        properties.insert(name, property);
        self.commit(self.types.clone(), properties)
    }

    fn commit(
        &mut self,
        types: Vec<Arc<dyn DataType>>,
        properties: BTreeMap<&'static str, Arc<dyn MetaschemaProperty>>,
    ) -> Result<()> {
        let metaschema = build_metaschema(&types, &properties);
        let validator = compile(&metaschema)?;
        self.types = types;
        self.properties = properties;
        self.metaschema = metaschema;
        self.validator = validator;
        debug!(types = self.types.len(), properties = self.properties.len(), "metaschema rebuilt");
        Ok(())
    }

    /// Look up a data type by tag.
    pub fn get_type(&self, name: &str) -> Result<Arc<dyn DataType>> {
        self.types
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    /// Check if a type tag is registered.
    pub fn has_type(&self, name: &str) -> bool {
        self.types.iter().any(|t| t.name() == name)
    }

    /// Registered type tags, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn property(&self, name: &str) -> Option<&Arc<dyn MetaschemaProperty>> {
        self.properties.get(name)
    }

    /// Registered property names, sorted.
    pub fn property_names(&self) -> Vec<&'static str> {
        self.properties.keys().copied().collect()
    }

    /// The JSON metaschema typedefs are validated against.
    pub fn metaschema(&self) -> &Value {
        &self.metaschema
    }

    /// Validate a typedef or metadata object against the metaschema.
    pub fn validate_typedef(&self, property: &str, typedef: &Map<String, Value>) -> Result<()> {
        validate_value(property, &Value::Object(typedef.clone()), &self.validator)
    }

    /// First registered type whose native representation matches `value`.
    pub fn infer_type(&self, value: &Value) -> Option<Arc<dyn DataType>> {
        self.types.iter().find(|t| t.accepts(value)).cloned()
    }

    /// Encode the typedef of `value` as `data_type`.
    ///
    /// `type` is always the type's tag and `title` is copied from the
    /// typedef; every other property comes from its own encoder.
    pub fn encode_type(
        &self,
        data_type: &dyn DataType,
        value: &Value,
        typedef: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let value = data_type.coerce(value.clone());
        if !data_type.accepts(&value) {
            return Err(SchemaError::validation(
                "type",
                format!("value could not be encoded as '{}'", data_type.name()),
            ));
        }

        let mut out = Map::new();
        for &name in data_type.properties() {
            let declared = typedef.get(name);
            match name {
                "type" => {
                    out.insert("type".to_string(), json!(data_type.name()));
                }
                "title" => {
                    if let Some(title) = declared {
                        out.insert("title".to_string(), title.clone());
                    }
                }
                _ => {
                    let property = self.property(name).ok_or_else(|| {
                        SchemaError::validation(name, "property is not registered")
                    })?;
                    if let Some(encoded) = property.encode(&value, declared, self)? {
                        out.insert(name.to_string(), encoded);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Encode the typedef of a container member, using the declared member
    /// typedef when present and inferring the type otherwise.
    pub(crate) fn encode_member(
        &self,
        value: &Value,
        declared: Option<&Value>,
    ) -> Result<Map<String, Value>> {
        let declared = declared.and_then(Value::as_object);
        let data_type = match declared.and_then(|d| d.get("type")).and_then(Value::as_str) {
            Some(name) => self.get_type(name)?,
            None => self.infer_type(value).ok_or_else(|| {
                SchemaError::validation("type", format!("no registered type accepts {value}"))
            })?,
        };
        let empty = Map::new();
        let typedef = declared.unwrap_or(&empty);
        let value = data_type.transform(data_type.coerce(value.clone()), typedef);
        self.encode_type(data_type.as_ref(), &value, typedef)
    }

    /// Normalize `value` against `typedef`.
    ///
    /// A null value takes the typedef's `default`. The typedef's type then
    /// coerces the value and, for containers, fills defaults declared by
    /// member typedefs that the value lacks. Typedefs without a `type` leave
    /// the value alone.
    pub fn normalize(&self, value: Value, typedef: &Map<String, Value>) -> Result<Value> {
        let value = match (value, typedef.get("default")) {
            (Value::Null, Some(default)) => default.clone(),
            (value, _) => value,
        };
        let Some(name) = typedef.get("type").and_then(Value::as_str) else {
            return Ok(value);
        };
        self.get_type(name)?.normalize(value, typedef, self)
    }

    /// Standard JSON Schema for instances of `typedef`.
    pub fn instance_schema(&self, typedef: &Map<String, Value>) -> Result<Value> {
        let name = typedef
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::validation("type", "typedef has no type"))?;
        self.get_type(name)?.instance_schema(typedef, self)
    }

    /// Compare encoded metadata against a declared typedef.
    ///
    /// Returns one `(property, message)` pair per mismatch. Keys without a
    /// registered property and non-validating properties are skipped.
    pub fn compare_schema(
        &self,
        encoded: &Map<String, Value>,
        declared: &Map<String, Value>,
    ) -> Vec<(String, String)> {
        let mut errors = Vec::new();
        for (key, expected) in declared {
            let Some(property) = self.property(key) else {
                continue;
            };
            if !property.validates() {
                continue;
            }
            match encoded.get(key) {
                None => errors.push((key.clone(), "missing from encoded metadata".to_string())),
                Some(actual) => {
                    if let Err(message) = property.compare(actual, expected, self) {
                        errors.push((key.clone(), message));
                    }
                }
            }
        }
        errors
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .field("properties", &self.property_names())
            .finish()
    }
}

fn build_metaschema(
    types: &[Arc<dyn DataType>],
    properties: &BTreeMap<&'static str, Arc<dyn MetaschemaProperty>>,
) -> Value {
    let mut names: Vec<&str> = types.iter().map(|t| t.name()).collect();
    names.sort_unstable();

    let mut schema_properties = Map::new();
    for (name, property) in properties {
        schema_properties.insert((*name).to_string(), property.schema());
    }
    schema_properties.insert("type".to_string(), json!({ "enum": names }));

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "modelcomm typedef",
        "type": "object",
        "required": ["type"],
        "properties": schema_properties,
    })
}

/// Schema requiring `required` keys and pinning `type` to one tag.
pub(crate) fn required_schema(data_type: &dyn DataType, required: &[&str]) -> Value {
    json!({
        "title": data_type.name(),
        "description": data_type.description(),
        "type": "object",
        "required": required,
        "properties": { "type": { "enum": [data_type.name()] } },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[derive(Debug)]
    struct NullType;

    impl DataType for NullType {
        fn name(&self) -> &'static str {
            "null"
        }

        fn description(&self) -> &'static str {
            "Nothing."
        }

        fn accepts(&self, value: &Value) -> bool {
            value.is_null()
        }

        fn instance_schema(&self, _: &Map<String, Value>, _: &TypeRegistry) -> Result<Value> {
            Ok(json!({ "type": "null" }))
        }
    }

    #[test]
    fn builtin_types_listed_in_metaschema() {
        let registry = TypeRegistry::new().unwrap();
        assert_eq!(
            registry.type_names(),
            vec!["array", "boolean", "bytes", "object", "scalar", "unicode"]
        );
        assert_eq!(
            registry.metaschema()["properties"]["type"]["enum"],
            json!(["array", "boolean", "bytes", "object", "scalar", "unicode"])
        );
    }

    #[test]
    fn register_type_extends_metaschema() {
        let mut registry = TypeRegistry::new().unwrap();
        let typedef = object(json!({ "type": "null" }));
        assert!(registry.validate_typedef("typedef", &typedef).is_err());

        registry.register_type(Arc::new(NullType)).unwrap();
        registry.validate_typedef("typedef", &typedef).unwrap();
        assert!(registry.has_type("null"));

        assert!(matches!(
            registry.register_type(Arc::new(NullType)),
            Err(SchemaError::DuplicateType(name)) if name == "null"
        ));
    }

    #[test]
    fn duplicate_property_rejected_unless_replacing() {
        let mut registry = TypeRegistry::new().unwrap();
        assert!(matches!(
            registry.register_property(Arc::new(properties::UnitsProperty)),
            Err(SchemaError::DuplicateProperty(name)) if name == "units"
        ));
        registry
            .register_property(Arc::new(properties::TitleProperty))
            .unwrap();
    }

    #[test]
    fn unknown_type_lookup_fails() {
        let registry = TypeRegistry::new().unwrap();
        assert!(matches!(
            registry.get_type("matrix"),
            Err(SchemaError::UnknownType(name)) if name == "matrix"
        ));
    }

    #[test]
    fn encode_type_runs_property_encoders() {
        let registry = TypeRegistry::new().unwrap();
        let scalar = registry.get_type("scalar").unwrap();
        let typedef = object(json!({
            "type": "scalar",
            "subtype": "int",
            "units": "cm",
            "title": "len"
        }));

        let encoded = registry
            .encode_type(scalar.as_ref(), &json!(300), &typedef)
            .unwrap();
        assert_eq!(
            Value::Object(encoded),
            json!({
                "type": "scalar",
                "subtype": "int",
                "precision": 16,
                "units": "cm",
                "title": "len"
            })
        );
    }

    #[test]
    fn nested_items_are_inferred() {
        let registry = TypeRegistry::new().unwrap();
        let array = registry.get_type("array").unwrap();

        let encoded = registry
            .encode_type(array.as_ref(), &json!([true, "x"]), &Map::new())
            .unwrap();
        assert_eq!(
            encoded["items"],
            json!([{ "type": "boolean" }, { "type": "unicode" }])
        );
    }

    #[test]
    fn compare_reports_mismatched_property() {
        let registry = TypeRegistry::new().unwrap();
        let encoded = object(json!({ "type": "scalar", "subtype": "int", "precision": 64 }));
        let declared = object(json!({
            "type": "scalar",
            "subtype": "int",
            "precision": 32,
            "title": "ignored"
        }));

        let errors = registry.compare_schema(&encoded, &declared);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "precision");
    }

    #[test]
    fn instance_schema_translates_nested_typedefs() {
        let registry = TypeRegistry::new().unwrap();
        let typedef = object(json!({
            "type": "object",
            "properties": { "n": { "type": "scalar", "subtype": "uint", "precision": 8 } }
        }));
        let schema = registry.instance_schema(&typedef).unwrap();
        assert_eq!(schema["properties"]["n"]["maximum"], json!(255));
        assert_eq!(schema["required"], json!(["n"]));
    }

    #[test]
    fn normalize_fills_member_defaults() {
        let registry = TypeRegistry::new().unwrap();
        let typedef = object(json!({
            "type": "object",
            "properties": {
                "name": { "type": "unicode" },
                "retries": { "type": "scalar", "subtype": "int", "default": 3 },
                "limits": {
                    "type": "object",
                    "properties": {
                        "low": { "type": "scalar", "subtype": "float", "default": 0.5 },
                        "high": { "type": "scalar", "subtype": "float" }
                    }
                }
            }
        }));

        let normalized = registry
            .normalize(json!({ "name": "run", "limits": { "high": 2.0 } }), &typedef)
            .unwrap();
        assert_eq!(
            normalized,
            json!({ "name": "run", "retries": 3, "limits": { "low": 0.5, "high": 2.0 } })
        );

        let kept = registry
            .normalize(json!({ "name": "run", "retries": 9, "limits": {} }), &typedef)
            .unwrap();
        assert_eq!(kept["retries"], json!(9));
        assert!(kept["limits"].get("high").is_none());
    }

    #[test]
    fn normalize_descends_into_array_items() {
        let registry = TypeRegistry::new().unwrap();
        let shared = object(json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": { "on": { "type": "boolean", "default": false } }
            }
        }));
        let normalized = registry
            .normalize(json!([{}, { "on": true }]), &shared)
            .unwrap();
        assert_eq!(normalized, json!([{ "on": false }, { "on": true }]));

        let tuple = object(json!({
            "type": "array",
            "items": [
                { "type": "unicode" },
                { "type": "scalar", "subtype": "int", "default": 1 },
                { "type": "scalar", "subtype": "int", "default": [2] }
            ]
        }));
        let normalized = registry.normalize(json!(["a"]), &tuple).unwrap();
        assert_eq!(normalized, json!(["a", 1, 2]));
    }

    #[test]
    fn normalize_replaces_null_with_default() {
        let registry = TypeRegistry::new().unwrap();
        let typedef = object(json!({ "type": "unicode", "default": "unset" }));
        assert_eq!(
            registry.normalize(Value::Null, &typedef).unwrap(),
            json!("unset")
        );
        assert_eq!(
            registry.normalize(json!("given"), &typedef).unwrap(),
            json!("given")
        );
        assert_eq!(
            registry.normalize(json!(7), &Map::new()).unwrap(),
            json!(7)
        );
    }

    #[test]
    fn normalize_rejects_unknown_member_type() {
        let registry = TypeRegistry::new().unwrap();
        let typedef = object(json!({
            "type": "object",
            "properties": { "m": { "type": "matrix", "default": 0 } }
        }));
        assert!(matches!(
            registry.normalize(json!({}), &typedef),
            Err(SchemaError::UnknownType(name)) if name == "matrix"
        ));
    }
}
