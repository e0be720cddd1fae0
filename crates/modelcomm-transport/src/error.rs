/// Errors that can occur in direct transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend queue is momentarily full; the caller may retry.
    #[error("queue {address} is full, try again")]
    TryAgain { address: String },

    /// The backend resource no longer exists (destroyed by its owner).
    #[error("queue {address} no longer exists")]
    ResourceGone { address: String },

    /// Attempted to remove a resource that is not registered with this process.
    #[error("queue {address} is not registered")]
    NotRegistered { address: String },

    /// The address cannot be interpreted by the backend.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// A single frame exceeds the backend's per-message ceiling.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The endpoint has not been opened or has already been closed.
    #[error("endpoint {0} is not open")]
    NotOpen(String),

    /// The backend is not available on this platform.
    #[error("transport '{0}' is not supported on this platform")]
    Unsupported(&'static str),

    /// A system call on the backend failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        source: std::io::Error,
    },

    /// An I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True for the transient full-queue condition.
    pub fn is_try_again(&self) -> bool {
        matches!(self, TransportError::TryAgain { .. })
    }

    /// True when the backend resource has been destroyed.
    pub fn is_gone(&self) -> bool {
        matches!(self, TransportError::ResourceGone { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
