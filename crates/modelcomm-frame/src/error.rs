/// Errors that can occur while framing or unframing envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A framed channel received bytes without the header separator.
    #[error("header separator not found in message")]
    MissingSeparator,

    /// The metadata segment is not valid JSON.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    /// The metadata segment is JSON but not an object.
    #[error("metadata must be a JSON object")]
    MetadataNotObject,

    /// The metadata does not declare the data size.
    #[error("metadata is missing 'size'")]
    MissingSize,

    /// The metadata header does not fit in the first frame of a chunked transfer.
    #[error("metadata header too large for one frame ({size} bytes, max {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// More data arrived than the metadata declared.
    #[error("received {received} bytes but metadata declared {expected}")]
    Overrun { expected: usize, received: usize },

    /// A continuation frame arrived for a message whose first frame was not seen.
    #[error("continuation frame for unknown message {id:?}")]
    UnexpectedContinuation { id: Option<String> },

    /// The per-frame size limit must be non-zero.
    #[error("frame size limit must be greater than zero")]
    InvalidFrameSize,
}

pub type Result<T> = std::result::Result<T, FrameError>;
