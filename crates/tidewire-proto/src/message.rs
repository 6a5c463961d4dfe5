//! Application-level message records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CodecError, Result};

/// One application record on the wire.
///
/// A JSON object with at least a `name` field. The transport never interprets
/// the name beyond routing it to observers; all other fields are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create a message with the given `name` and no other fields.
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String(name.into()));
        Self(fields)
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// The `name` field, if present and a string.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Look up an arbitrary field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All fields, in wire order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// True if the record has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse one decoded line (without its trailing separator).
    pub fn from_line(line: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(line)? {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(CodecError::NotAnObject { kind: json_kind(&other) }),
        }
    }

    /// Serialize to a single wire line, separator included.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(&self.0)?;
        line.push('\n');
        Ok(line)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for Message {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(CodecError::NotAnObject { kind: json_kind(&other) }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
