use std::time::Duration;

/// Errors that can occur in channel operations.
///
/// Transient conditions (full queue, empty queue, closed peer, elapsed
/// deadline) are reported through flags and
/// [`RecvStatus`](crate::RecvStatus) instead.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] modelcomm_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] modelcomm_frame::FrameError),

    /// Typed codec error.
    #[error("schema error: {0}")]
    Schema(#[from] modelcomm_schema::SchemaError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel is closed.
    #[error("channel {0} is closed")]
    Closed(String),

    /// A blocking wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A scheduled task result is still outstanding.
    #[error("a scheduled task is already pending on {0}")]
    TaskPending(String),

    /// The background worker exited unexpectedly.
    #[error("background worker for {0} is gone")]
    WorkerGone(String),

    /// The operation does not match the channel direction.
    #[error("operation requires a {expected} channel but {name} is {actual}")]
    InvalidDirection {
        name: String,
        expected: modelcomm_transport::Direction,
        actual: modelcomm_transport::Direction,
    },
}

pub type Result<T> = std::result::Result<T, CommError>;
