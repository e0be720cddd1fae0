use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

pub(crate) fn compile(schema: &Value) -> Result<Validator> {
    jsonschema::validator_for(schema).map_err(|err| SchemaError::CompileFailed(err.to_string()))
}

/// Validate `instance`, reporting up to four errors against `property`.
pub(crate) fn validate_value(
    property: &str,
    instance: &Value,
    validator: &Validator,
) -> Result<()> {
    let mut errors = validator.iter_errors(instance);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::validation(property, message));
    }

    Ok(())
}

/// Compile `schema` and validate `instance` against it in one step.
pub(crate) fn validate_with(property: &str, instance: &Value, schema: &Value) -> Result<()> {
    validate_value(property, instance, &compile(schema)?)
}
