use serde_json::{Map, Value};

use crate::codec::MSG_HEAD;
use crate::error::{FrameError, Result};

/// Envelope metadata: a JSON object describing the data segment.
///
/// Required keys are `type` and `size`; `id`, `title`, `eof` and
/// `incomplete` are optional, and types add their own schema properties.
/// Keys serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Metadata carrying only a data size.
    pub fn with_size(size: usize) -> Self {
        let mut metadata = Self::new();
        metadata.set_size(size);
        metadata
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Mutably borrow the underlying JSON object.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Consume and return the underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Declared byte length of the data segment.
    pub fn size(&self) -> Option<usize> {
        self.0
            .get("size")
            .and_then(Value::as_u64)
            .and_then(|size| usize::try_from(size).ok())
    }

    pub fn set_size(&mut self, size: usize) {
        self.0.insert("size".to_string(), Value::from(size));
    }

    /// Type tag of the encoded value.
    pub fn type_name(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Per-message unique token.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    /// True when the payload is the end-of-stream sentinel.
    pub fn is_eof(&self) -> bool {
        self.flag("eof")
    }

    pub fn set_eof(&mut self, eof: bool) {
        self.0.insert("eof".to_string(), Value::Bool(eof));
    }

    /// True when fewer bytes have arrived than `size` declares.
    pub fn is_incomplete(&self) -> bool {
        self.flag("incomplete")
    }

    pub fn set_incomplete(&mut self, incomplete: bool) {
        self.0
            .insert("incomplete".to_string(), Value::Bool(incomplete));
    }

    /// Serialize for the wire, guaranteeing the separator never appears.
    pub fn to_header_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(&self.0)?;
        Ok(escape_separator(json))
    }

    /// Parse a metadata segment.
    pub fn from_header_bytes(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(FrameError::MetadataNotObject),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Replace the first byte of every separator occurrence with a JSON
/// `\u00XX` escape.
///
/// The separator has no quote characters, so any occurrence in serialized
/// JSON lies inside a string literal where the escape decodes to the
/// same text.
fn escape_separator(json: Vec<u8>) -> Vec<u8> {
    if find(&json, MSG_HEAD).is_none() {
        return json;
    }

    let escaped_first = format!("\\u{:04x}", MSG_HEAD[0]);
    let mut out = Vec::with_capacity(json.len() + escaped_first.len());
    let mut rest = json.as_slice();
    while let Some(pos) = find(rest, MSG_HEAD) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(escaped_first.as_bytes());
        rest = &rest[pos + 1..];
    }
    out.extend_from_slice(rest);
    out
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
