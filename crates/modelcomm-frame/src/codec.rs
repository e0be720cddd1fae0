use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::metadata::{find, Metadata};

/// Separator between the metadata segment and the data segment.
pub const MSG_HEAD: &[u8] = b"MODELCOMM_MSG_HEAD";

/// End-of-stream sentinel payload.
pub const MSG_EOF: &[u8] = b"EOF!!!";

/// How a channel treats incoming bytes that carry no separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Every message must carry a metadata header (EOF excepted).
    #[default]
    Framed,
    /// Header-less messages are accepted as raw data.
    Raw,
}

/// A decoded wire message: metadata plus the (possibly partial) data segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub metadata: Metadata,
    pub data: Bytes,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(metadata: Metadata, data: impl Into<Bytes>) -> Self {
        Self {
            metadata,
            data: data.into(),
        }
    }

    /// True when the data segment is the end-of-stream sentinel.
    pub fn is_eof(&self) -> bool {
        self.data.as_ref() == MSG_EOF
    }

    /// True for the zero-length message.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.metadata.size() == Some(0)
    }

    /// True when more data segments are needed to reach `size`.
    pub fn is_incomplete(&self) -> bool {
        self.metadata.is_incomplete()
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬────────────────────┬──────────────┐
/// │ Metadata (JSON)      │ MODELCOMM_MSG_HEAD │ Data         │
/// │ sorted keys, escaped │ separator          │ (size bytes) │
/// └──────────────────────┴────────────────────┴──────────────┘
/// ```
pub fn encode_envelope(metadata: &Metadata, data: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = metadata.to_header_bytes()?;
    dst.reserve(header.len() + MSG_HEAD.len() + data.len());
    dst.put_slice(&header);
    dst.put_slice(MSG_HEAD);
    dst.put_slice(data);
    Ok(())
}

/// Encode an envelope into a fresh buffer.
pub fn envelope_bytes(metadata: &Metadata, data: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_envelope(metadata, data, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one wire message.
///
/// An empty message decodes to size 0. A message without the separator is
/// accepted only when it is the EOF sentinel or the mode is
/// [`FramingMode::Raw`]; its size is its own length. When fewer bytes follow
/// the separator than `size` declares, the metadata is marked incomplete.
pub fn decode_envelope(msg: &Bytes, mode: FramingMode) -> Result<Envelope> {
    if msg.is_empty() {
        return Ok(Envelope::new(Metadata::with_size(0), Bytes::new()));
    }

    let Some(pos) = find(msg, MSG_HEAD) else {
        if msg.as_ref() == MSG_EOF || mode == FramingMode::Raw {
            return Ok(Envelope::new(Metadata::with_size(msg.len()), msg.clone()));
        }
        return Err(FrameError::MissingSeparator);
    };

    let header = &msg[..pos];
    let data = msg.slice(pos + MSG_HEAD.len()..);

    let mut metadata = if header.is_empty() {
        Metadata::with_size(data.len())
    } else {
        Metadata::from_header_bytes(header)?
    };

    let size = metadata.size().ok_or(FrameError::MissingSize)?;
    if data.len() > size {
        return Err(FrameError::Overrun {
            expected: size,
            received: data.len(),
        });
    }
    metadata.set_incomplete(data.len() < size);

    Ok(Envelope::new(metadata, data))
}
