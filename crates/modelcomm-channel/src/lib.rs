//! Asynchronous typed channels for modelcomm.
//!
//! [`AsyncComm`] moves raw frames through a background worker so neither
//! side blocks on the backend. [`Comm`] layers the typed serializer and
//! chunked transfer on top, and [`ServerComm`]/[`ClientComm`] pair requests
//! with replies over a shared request queue.

pub mod async_comm;
pub mod client;
pub mod comm;
pub mod config;
pub mod control;
pub mod error;
pub mod sched;
pub mod server;
pub mod status;

pub use async_comm::{AsyncComm, CloseHandle};
pub use client::ClientComm;
pub use comm::Comm;
pub use config::{CommConfig, RetryConfig};
pub use control::{ControlKind, ControlMessage, CLIENT_ID_KEY, CONTROL_KEY};
pub use error::{CommError, Result};
pub use sched::Scheduled;
pub use server::ServerComm;
pub use status::RecvStatus;

pub use modelcomm_schema::{Message, SerializeOptions};
pub use modelcomm_transport::{Direction, TransportKind, GENERATE_ADDRESS};
