use modelcomm_frame::FrameError;

/// Errors that can occur while validating, encoding or decoding typed values.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A value, typedef or metadata did not match its schema.
    #[error("validation failed on '{property}': {message}")]
    Validation { property: String, message: String },

    /// No type is registered under the given name.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// A typedef's `type` cannot change once set.
    #[error("cannot update typedef for type '{current}' to be '{requested}'")]
    TypeMismatch { current: String, requested: String },

    /// A caller-supplied metadata value disagrees with the encoder's value.
    #[error("metadata key '{key}' is set by the type encoder")]
    KeyConflict { key: String },

    /// A reserved key appeared in message metadata.
    #[error("'{0}' is a reserved metadata key")]
    ReservedKey(String),

    /// A schema property with the same name is already registered.
    #[error("schema property '{0}' is already registered")]
    DuplicateProperty(String),

    /// A type with the same name is already registered.
    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    /// A generated schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The data segment is not valid JSON.
    #[error("data is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The envelope could not be framed or unframed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl SchemaError {
    pub(crate) fn validation(property: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::Validation {
            property: property.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchemaError>;
