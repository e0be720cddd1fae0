use std::sync::Arc;

use bytes::Bytes;
use modelcomm_frame::{decode_envelope, envelope_bytes, Envelope, FramingMode, Metadata, MSG_EOF};
use serde_json::{Map, Value};
use tracing::trace;

use crate::codec::TypedCodec;
use crate::error::{Result, SchemaError};
use crate::registry::TypeRegistry;

/// Metadata key reserved for the data segment.
pub const RESERVED_DATA_KEY: &str = "data";

/// A logical message on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A typed application value.
    Value(Value),
    /// The zero-length "no data" message.
    Empty,
    /// The end-of-stream sentinel.
    Eof,
    /// Bytes passed through without decoding: header-less data on a raw
    /// channel, or the partial data of an incomplete envelope.
    Raw(Bytes),
}

impl Message {
    pub fn is_eof(&self) -> bool {
        matches!(self, Message::Eof)
    }

    /// The decoded value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Message::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Message::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Value(value)
    }
}

/// Per-call serialization options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializeOptions {
    /// Emit only the data segment.
    pub no_metadata: bool,
    /// Caller metadata merged after encoding. A key the encoder already set
    /// must carry the same value.
    pub extra: Map<String, Value>,
}

impl SerializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_metadata(mut self) -> Self {
        self.no_metadata = true;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Envelope-level serializer owned by one channel.
#[derive(Debug, Clone)]
pub struct Serializer {
    codec: TypedCodec,
}

impl Serializer {
    /// Build a serializer for `typedef`.
    pub fn new(registry: Arc<TypeRegistry>, typedef: Value) -> Result<Self> {
        Ok(Self {
            codec: TypedCodec::new(registry, typedef)?,
        })
    }

    pub fn from_codec(codec: TypedCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &TypedCodec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut TypedCodec {
        &mut self.codec
    }

    /// Generic bytes channels accept header-less messages.
    pub fn framing_mode(&self) -> FramingMode {
        if self.codec.is_generic_bytes() {
            FramingMode::Raw
        } else {
            FramingMode::Framed
        }
    }

    /// Serialize a message into wire bytes.
    ///
    /// The EOF sentinel bypasses the codec. `Raw` bytes are written
    /// verbatim. `Empty` is the zero-length message, or a metadata-only
    /// envelope when extra metadata is supplied.
    pub fn serialize(&self, message: &Message, options: &SerializeOptions) -> Result<Bytes> {
        let (mut metadata, data) = match message {
            Message::Raw(bytes) => return Ok(bytes.clone()),
            Message::Empty if options.no_metadata || options.extra.is_empty() => {
                return Ok(Bytes::new());
            }
            Message::Empty => (Map::new(), Bytes::new()),
            Message::Eof => (Map::new(), Bytes::from_static(MSG_EOF)),
            Message::Value(value) => {
                let (metadata, data) = self.codec.encode(value.clone())?;
                (metadata, Bytes::from(serde_json::to_vec(&data)?))
            }
        };

        for (key, value) in &options.extra {
            match metadata.get(key) {
                Some(existing) if existing != value => {
                    return Err(SchemaError::KeyConflict { key: key.clone() });
                }
                _ => {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }
        if metadata.contains_key(RESERVED_DATA_KEY) {
            return Err(SchemaError::ReservedKey(RESERVED_DATA_KEY.to_string()));
        }
        if options.no_metadata {
            return Ok(data);
        }

        let mut metadata = Metadata::from_map(metadata);
        metadata.set_size(data.len());
        if metadata.id().is_none() {
            metadata.insert("id", Value::String(uuid::Uuid::new_v4().to_string()));
        }
        trace!(size = data.len(), "serialized message");
        Ok(envelope_bytes(&metadata, &data)?)
    }

    /// Deserialize wire bytes into a message and its metadata.
    pub fn deserialize(&self, msg: &Bytes) -> Result<(Message, Metadata)> {
        let envelope = decode_envelope(msg, self.framing_mode())?;
        self.deserialize_envelope(envelope)
    }

    /// Deserialize an already-split envelope.
    ///
    /// Incomplete envelopes are returned as `Raw` partial data without
    /// decoding.
    pub fn deserialize_envelope(&self, envelope: Envelope) -> Result<(Message, Metadata)> {
        let Envelope { mut metadata, data } = envelope;
        if metadata.is_incomplete() {
            return Ok((Message::Raw(data), metadata));
        }
        if data.is_empty() {
            return Ok((Message::Empty, metadata));
        }
        if data.as_ref() == MSG_EOF {
            metadata.set_eof(true);
            return Ok((Message::Eof, metadata));
        }
        if metadata.type_name().is_none() && self.framing_mode() == FramingMode::Raw {
            return Ok((Message::Raw(data), metadata));
        }

        let data: Value = serde_json::from_slice(&data)?;
        let value = self.codec.decode(metadata.as_map(), data)?;
        Ok((Message::Value(value), metadata))
    }
}
