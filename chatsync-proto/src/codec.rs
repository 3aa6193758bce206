//! The JSON wire envelope and its encode/decode functions.
//!
//! Every WebSocket text frame, in both directions, is one [`Envelope`]:
//!
//! ```json
//! { "type": "send_message", "payload": { ... }, "correlation_id": "..." }
//! ```
//!
//! A reply to a request of type `T` is typed `T_response` and carries the
//! same `correlation_id`. Failures are reported through the optional
//! `error` object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix appended to a request type to form its response type.
pub const RESPONSE_SUFFIX: &str = "_response";

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame parsed as JSON but is not a valid envelope.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl WireError {
    /// Builds an error object.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Top-level frame wrapping every request, response and broadcast event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Request, response or event type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific body.
    #[serde(default = "empty_payload")]
    pub payload: Value,
    /// Token matching a response to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Present when the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Envelope {
    /// Builds an uncorrelated envelope (a broadcast event).
    pub fn event(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            correlation_id: None,
            error: None,
        }
    }

    /// Builds a request envelope tagged with `correlation_id`.
    pub fn request(kind: impl Into<String>, payload: Value, correlation_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            correlation_id: Some(correlation_id.into()),
            error: None,
        }
    }

    /// Builds the successful response to `request`.
    #[must_use]
    pub fn response_to(request: &Self, payload: Value) -> Self {
        Self {
            kind: response_type(&request.kind),
            payload,
            correlation_id: request.correlation_id.clone(),
            error: None,
        }
    }

    /// Builds the failed response to `request`.
    #[must_use]
    pub fn error_response_to(request: &Self, error: WireError) -> Self {
        Self {
            kind: response_type(&request.kind),
            payload: empty_payload(),
            correlation_id: request.correlation_id.clone(),
            error: Some(error),
        }
    }

    /// Returns `true` if the type carries the response suffix.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.kind.ends_with(RESPONSE_SUFFIX)
    }
}

/// Returns the response type for a request type (`T` -> `T_response`).
#[must_use]
pub fn response_type(request_type: &str) -> String {
    format!("{request_type}{RESPONSE_SUFFIX}")
}

/// Encodes an [`Envelope`] into a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the envelope cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an [`Envelope`] from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the frame is empty or its type is
/// blank, and `CodecError::Serialization` if it is not an envelope-shaped
/// JSON object.
pub fn decode(frame: &str) -> Result<Envelope, CodecError> {
    if frame.trim().is_empty() {
        return Err(CodecError::InvalidFrame("empty frame".into()));
    }
    let envelope: Envelope =
        serde_json::from_str(frame).map_err(|e| CodecError::Serialization(e.to_string()))?;
    if envelope.kind.is_empty() {
        return Err(CodecError::InvalidFrame("missing envelope type".into()));
    }
    Ok(envelope)
}
