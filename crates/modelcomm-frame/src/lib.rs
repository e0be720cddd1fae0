//! Self-describing message envelopes and chunked transfer for modelcomm.
//!
//! Every framed message is a JSON metadata object (sorted keys) followed by
//! the `MODELCOMM_MSG_HEAD` separator and the encoded data:
//! - `size` declares the full data length
//! - `type` names the registered type of the value
//! - `incomplete` is set while continuation frames are outstanding
//!
//! Messages larger than a transport's per-frame ceiling are split with
//! [`split_frames`] and rebuilt with [`Reassembler`]. Continuation frames
//! carry a `{"chunk":n,"id":...}` header so messages from several senders
//! can share a queue.

pub mod chunk;
pub mod codec;
pub mod error;
pub mod metadata;

pub use chunk::{split_frames, Assembled, Reassembler};
pub use codec::{
    decode_envelope, encode_envelope, envelope_bytes, Envelope, FramingMode, MSG_EOF, MSG_HEAD,
};
pub use error::{FrameError, Result};
pub use metadata::Metadata;
