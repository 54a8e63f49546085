//! The one response shape accepted from the backend.
//!
//! ```text
//! { "success": true, "data": <T>, "message": "optional" }
//! ```
//!
//! Bare arrays, bare objects and envelopes without `data` are rejected
//! instead of being guessed at.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    pub data: T,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }
}

fn default_success() -> bool {
    true
}

/// Parse `body` as an envelope and return its payload.
pub fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T, EnvelopeError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(EnvelopeError::InvalidJson)?;
    parse_envelope_value(value)
}

/// Same as [`parse_envelope`] for an already-decoded body.
pub fn parse_envelope_value<T: DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, EnvelopeError> {
    let mut object = match value {
        serde_json::Value::Object(object) => object,
        serde_json::Value::Array(_) => return Err(EnvelopeError::NotAnEnvelope("an array")),
        serde_json::Value::String(_) => return Err(EnvelopeError::NotAnEnvelope("a string")),
        serde_json::Value::Number(_) => return Err(EnvelopeError::NotAnEnvelope("a number")),
        serde_json::Value::Bool(_) => return Err(EnvelopeError::NotAnEnvelope("a boolean")),
        serde_json::Value::Null => return Err(EnvelopeError::NotAnEnvelope("null")),
    };

    if object.get("success") == Some(&serde_json::Value::Bool(false)) {
        let message = object
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message")
            .to_string();
        return Err(EnvelopeError::Rejected(message));
    }

    let data = object.remove("data").ok_or(EnvelopeError::MissingData)?;
    serde_json::from_value(data).map_err(EnvelopeError::DataShape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    #[test]
    fn test_parses_data() {
        let item: Item = parse_envelope(r#"{"success":true,"data":{"id":7}}"#).unwrap();
        assert_eq!(item, Item { id: 7 });
    }

    #[test]
    fn test_success_defaults_to_true() {
        let items: Vec<Item> = parse_envelope(r#"{"data":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_rejects_bare_array() {
        let result: Result<Vec<Item>, _> = parse_envelope(r#"[{"id":1}]"#);
        assert!(matches!(result, Err(EnvelopeError::NotAnEnvelope("an array"))));
    }

    #[test]
    fn test_rejects_bare_object() {
        let result: Result<Item, _> = parse_envelope(r#"{"id":1}"#);
        assert!(matches!(result, Err(EnvelopeError::MissingData)));
    }

    #[test]
    fn test_rejects_unsuccessful() {
        let result: Result<Item, _> =
            parse_envelope(r#"{"success":false,"message":"session expired","data":null}"#);
        match result {
            Err(EnvelopeError::Rejected(message)) => assert_eq!(message, "session expired"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_wrong_data_shape() {
        let result: Result<Item, _> = parse_envelope(r#"{"data":{"name":"x"}}"#);
        assert!(matches!(result, Err(EnvelopeError::DataShape(_))));
    }

    #[test]
    fn test_rejects_invalid_json() {
        let result: Result<Item, _> = parse_envelope("<html>");
        assert!(matches!(result, Err(EnvelopeError::InvalidJson(_))));
    }
}
