//! Typed message channels between independently written model processes.
//!
//! modelcomm moves self-describing, schema-checked messages over message
//! queues, with non-blocking endpoints, transparent chunking of oversized
//! messages and request/response pairing.
//!
//! # Crate Structure
//!
//! - [`transport`]: direct queue backends (in-process, System V)
//! - [`frame`]: envelope wire format and chunk reassembly
//! - [`schema`]: type registry, typed codec and serializer
//! - [`channel`]: background-worker endpoints, typed comms and RPC

/// Re-export transport types.
pub mod transport {
    pub use modelcomm_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use modelcomm_frame::*;
}

/// Re-export schema types.
pub mod schema {
    pub use modelcomm_schema::*;
}

/// Re-export channel types.
pub mod channel {
    pub use modelcomm_channel::*;
}

pub use modelcomm_channel::{
    ClientComm, Comm, CommConfig, CommError, Direction, Message, RecvStatus, ServerComm,
    TransportKind, GENERATE_ADDRESS,
};
pub use modelcomm_schema::TypeRegistry;
