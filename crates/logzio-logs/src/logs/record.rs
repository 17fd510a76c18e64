// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Records as delivered by the Lambda Logs API.
//!
//! A delivery is a JSON array of `{"time": ..., "type": ..., "record": ...}`
//! objects. Decoding is lenient per field: a record with a missing or oddly
//! shaped field still decodes, with that field absent, so one bad record
//! can be dropped by the transformer without losing the rest of the batch.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// An ordered delivery of records. Never reordered once queued.
pub type Batch = Vec<LogRecord>;

/// The body of a record: a plain line or a structured object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Fields(Map<String, Value>),
}

impl Payload {
    /// Keep-alive lines the platform emits consist only of whitespace.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        match self {
            Payload::Text(text) => text.trim().is_empty(),
            Payload::Fields(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogRecord {
    /// Opaque timestamp, forwarded untouched.
    #[serde(rename = "time", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    /// `function`, `platform` or `extension`.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "string_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_type: Option<String>,

    #[serde(
        rename = "record",
        default,
        deserialize_with = "payload_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Payload>,
}

impl LogRecord {
    pub fn new(timestamp: impl Into<Value>, source_type: &str, payload: Payload) -> Self {
        LogRecord {
            timestamp: Some(timestamp.into()),
            source_type: Some(source_type.to_string()),
            payload: Some(payload),
        }
    }

    /// Shorthand for a function record with a text payload.
    pub fn text(timestamp: &str, message: &str) -> Self {
        Self::new(timestamp, "function", Payload::Text(message.to_string()))
    }
}

/// Decodes one Logs API delivery.
pub fn decode_batch(body: &[u8]) -> Result<Batch, serde_json::Error> {
    serde_json::from_slice(body)
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn payload_or_none<'de, D>(deserializer: D) -> Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(Payload::Text(s))),
        Value::Object(fields) => Ok(Some(Payload::Fields(fields))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_text_and_fields() {
        let body = json!([
            {"time": "2021-11-11T08:28:16.870Z", "type": "function", "record": "hello\n"},
            {"time": "2021-11-11T08:28:16.871Z", "type": "platform", "record": {"requestId": "abc"}}
        ])
        .to_string();

        let batch = decode_batch(body.as_bytes()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, Some(Payload::Text("hello\n".to_string())));
        assert_eq!(batch[1].source_type.as_deref(), Some("platform"));
        match &batch[1].payload {
            Some(Payload::Fields(fields)) => assert_eq!(fields["requestId"], "abc"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_decode_is_lenient_per_field() {
        let body = json!([
            {"type": 7, "record": 42},
            {"time": null, "record": ["a"]}
        ])
        .to_string();

        let batch = decode_batch(body.as_bytes()).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|r| r.payload.is_none()));
        assert_eq!(batch[0].source_type, None);
        assert_eq!(batch[1].timestamp, None);
    }

    #[test]
    fn test_decode_rejects_non_array() {
        assert!(decode_batch(b"{\"record\": \"x\"}").is_err());
        assert!(decode_batch(b"not json").is_err());
    }

    #[test]
    fn test_placeholder() {
        assert!(Payload::Text(" \n".to_string()).is_placeholder());
        assert!(Payload::Text(String::new()).is_placeholder());
        assert!(!Payload::Text("x\n".to_string()).is_placeholder());
        assert!(!Payload::Fields(Map::new()).is_placeholder());
    }
}
