use modelcomm_frame::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Metadata key marking a control envelope.
pub const CONTROL_KEY: &str = "modelcomm_control";
/// Metadata key carrying the sending client's id on requests.
pub const CLIENT_ID_KEY: &str = "client_id";

/// Kind of RPC control message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Register a reply address with the server.
    Signon,
    /// Ask the server to forget a client.
    Signoff,
}

/// Metadata-only envelope exchanged between RPC clients and servers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "modelcomm_control")]
    pub kind: ControlKind,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_address: Option<String>,
}

impl ControlMessage {
    /// Create a signon message.
    pub fn signon(client_id: impl Into<String>, response_address: impl Into<String>) -> Self {
        Self {
            kind: ControlKind::Signon,
            client_id: client_id.into(),
            response_address: Some(response_address.into()),
        }
    }

    /// Create a signoff message.
    pub fn signoff(client_id: impl Into<String>) -> Self {
        Self {
            kind: ControlKind::Signoff,
            client_id: client_id.into(),
            response_address: None,
        }
    }

    /// Envelope metadata for this message (`size` 0, fresh `id`).
    pub fn to_metadata(&self) -> Result<Metadata> {
        let mut metadata = match serde_json::to_value(self)? {
            Value::Object(map) => Metadata::from_map(map),
            _ => Metadata::new(),
        };
        metadata.set_size(0);
        metadata.insert("id", Value::String(uuid::Uuid::new_v4().to_string()));
        Ok(metadata)
    }

    /// Parse a control message out of envelope metadata. `None` for
    /// ordinary messages.
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        if !metadata.contains_key(CONTROL_KEY) {
            return None;
        }
        serde_json::from_value(Value::Object(metadata.as_map().clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn signon_metadata_shape() {
        let metadata = ControlMessage::signon("c1", "42").to_metadata().unwrap();
        assert_eq!(metadata.get(CONTROL_KEY), Some(&json!("signon")));
        assert_eq!(metadata.get("client_id"), Some(&json!("c1")));
        assert_eq!(metadata.get("response_address"), Some(&json!("42")));
        assert_eq!(metadata.size(), Some(0));
        assert!(metadata.id().is_some());
    }

    #[test]
    fn parse_ignores_envelope_keys() {
        let mut metadata = ControlMessage::signoff("c2").to_metadata().unwrap();
        metadata.set_incomplete(false);

        let parsed = ControlMessage::from_metadata(&metadata).unwrap();
        assert_eq!(parsed, ControlMessage::signoff("c2"));
    }

    #[test]
    fn ordinary_metadata_is_not_control() {
        let metadata = Metadata::with_size(3);
        assert!(ControlMessage::from_metadata(&metadata).is_none());
    }
}
