use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// Address sentinel asking the transport to allocate a fresh resource.
pub const GENERATE_ADDRESS: &str = "generate";

/// Per-frame ceiling for the message-queue backends.
///
/// Matches the smallest System V limit seen in practice (macOS), so the
/// same chunking decisions are made on every platform.
pub const DEFAULT_MAX_MSG_SIZE: usize = 2048;

/// Which way messages flow through an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Recv => f.write_str("recv"),
        }
    }
}

/// Synchronous, backend-specific primitives for one endpoint.
///
/// Implementations never block: a full queue is reported as
/// [`TransportError::TryAgain`](crate::TransportError::TryAgain) and an
/// empty queue as `Ok(None)` from [`recv_direct`](Self::recv_direct).
/// The endpoint that allocated the resource (bound with
/// [`GENERATE_ADDRESS`]) owns it and is the only one allowed to destroy it.
pub trait DirectTransport: Send {
    /// Resolve the address, allocating a new resource for the generate sentinel.
    fn bind(&mut self) -> Result<()>;

    /// Acquire the native resource, binding first if needed.
    fn open_direct(&mut self) -> Result<()>;

    /// Release the native resource. Owners destroy it; other endpoints
    /// only drop their handle. Closing twice is a no-op.
    fn close_direct(&mut self) -> Result<()>;

    /// Liveness probe. A resource destroyed by its owner reads as closed.
    fn is_open_direct(&mut self) -> bool;

    /// Send one frame. `Ok(false)` when the endpoint is not open.
    fn send_direct(&mut self, payload: &[u8]) -> Result<bool>;

    /// Receive one frame if one is pending.
    fn recv_direct(&mut self) -> Result<Option<Bytes>>;

    /// Frames written but not yet consumed.
    fn n_msg_direct_send(&mut self) -> usize;

    /// Frames waiting to be read.
    fn n_msg_direct_recv(&mut self) -> usize {
        self.n_msg_direct_send()
    }

    /// Drain pending frames without processing them.
    fn purge(&mut self) -> Result<usize>;

    /// Resolved address, if bound.
    fn address(&self) -> Option<&str>;

    /// True when this endpoint allocated (and therefore owns) the resource.
    fn is_owner(&self) -> bool;

    /// Fixed per-frame ceiling for this backend.
    fn max_msg_size(&self) -> usize {
        DEFAULT_MAX_MSG_SIZE
    }

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl fmt::Debug for dyn DirectTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectTransport")
            .field("type", &self.transport_name())
            .field("address", &self.address())
            .field("owner", &self.is_owner())
            .finish()
    }
}

/// Parse a queue address into its integer key.
pub(crate) fn parse_key(address: &str) -> Result<i64> {
    address
        .trim()
        .parse::<i64>()
        .map_err(|_| crate::error::TransportError::InvalidAddress(address.to_string()))
}
