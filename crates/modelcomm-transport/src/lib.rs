//! Direct message-queue transports.
//!
//! Every backend implements the same synchronous, non-blocking contract
//! ([`DirectTransport`]):
//! - In-process queues ([`MemoryQueue`]) shared through a [`QueueRegistry`]
//! - System V message queues ([`SysvQueue`], Linux)
//!
//! This is the lowest layer of modelcomm. Everything else builds on the
//! frames moved by these endpoints.

pub mod error;
pub mod kind;
pub mod memory;
pub mod traits;

#[cfg(target_os = "linux")]
pub mod sysv;

pub use error::{Result, TransportError};
pub use kind::TransportKind;
pub use memory::{MemoryQueue, QueueConfig, QueueRegistry};
pub use traits::{Direction, DirectTransport, DEFAULT_MAX_MSG_SIZE, GENERATE_ADDRESS};

#[cfg(target_os = "linux")]
pub use sysv::SysvQueue;
