//! Decoding of raw MQTT messages into device readings.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::topic::TopicNamespace;

/// Errors produced while decoding a message payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object of fields.
    #[error("payload is a JSON {kind}, expected an object")]
    NotAnObject { kind: &'static str },
}

/// The set of field/value pairs published by one device in one message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    /// Device identifier derived from the topic.
    pub device_id: String,

    /// Top-level payload fields, values left untyped.
    pub fields: Map<String, Value>,
}

impl DecodedReading {
    /// Number of fields in the reading.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the reading carries no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over field names and raw values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Stateless decoder bound to a topic namespace.
#[derive(Debug, Clone, Default)]
pub struct MessageDecoder {
    namespace: TopicNamespace,
}

impl MessageDecoder {
    /// Create a decoder for the given namespace.
    pub fn new(namespace: TopicNamespace) -> Self {
        Self { namespace }
    }

    /// The namespace this decoder strips from topics.
    pub fn namespace(&self) -> &TopicNamespace {
        &self.namespace
    }

    /// Decode a message into a reading.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<DecodedReading, DecodeError> {
        decode(&self.namespace, topic, payload)
    }
}

/// Decode a message published on `topic` into a [`DecodedReading`].
///
/// Nested objects and arrays are kept as-is; they are not flattened.
pub fn decode(
    namespace: &TopicNamespace,
    topic: &str,
    payload: &[u8],
) -> Result<DecodedReading, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(DecodeError::NotAnObject {
                kind: json_kind(&other),
            });
        }
    };

    Ok(DecodedReading {
        device_id: namespace.device_id(topic).to_string(),
        fields,
    })
}

/// Human-readable name of a JSON value's type.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
