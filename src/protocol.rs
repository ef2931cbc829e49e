//! Wire protocol — flat JSON envelopes for the fleet websocket.
//!
//! ARCHITECTURE
//! ============
//! Every message on the fleet socket is a flat JSON object. Inbound messages
//! carry an `action` field naming the requested operation plus the operation's
//! arguments as sibling keys. Outbound messages are either events (an `action`
//! field naming the event plus payload keys), action errors
//! (`{"action": "error", "message": ...}`), or protocol errors
//! (`{"error": ...}`) for messages that never reached a handler.
//!
//! DESIGN
//! ======
//! - Flat data: payloads are always `Map<String, Value>` at the top level,
//!   never wrapped in a `data` sub-object.
//! - `to_user_id` on a request redirects the success reply to that user's
//!   group instead of the sender.
//! - Responses to `do_thing` are named `do_thing_response` unless the handler
//!   names the event explicitly.

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Ordered so serialized output is stable in tests.
pub type Data = serde_json::Map<String, serde_json::Value>;

/// A geographic coordinate pair as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Named event with a flat payload: `{"action": <name>, ...data}`.
    Event { action: String, data: Data },
    /// Handler-level failure: `{"action": "error", "message": <message>}`.
    ActionError { message: String },
    /// Transport-level failure: `{"error": <error>}`. The message never
    /// reached a handler (bad JSON, missing or unknown action).
    ProtocolError { error: String },
}

impl Envelope {
    pub fn event(action: impl Into<String>, data: Data) -> Self {
        Envelope::Event { action: action.into(), data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::ActionError { message: message.into() }
    }

    pub fn protocol_error(error: impl Into<String>) -> Self {
        Envelope::ProtocolError { error: error.into() }
    }

    /// Event name, if this envelope is an event.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        match self {
            Envelope::Event { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Payload field lookup, for tests and logging.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            Envelope::Event { data, .. } => data.get(key),
            _ => None,
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Envelope::Event { action, data } => {
                let mut map = serializer.serialize_map(Some(data.len() + 1))?;
                map.serialize_entry("action", action)?;
                for (key, value) in data {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Envelope::ActionError { message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("action", "error")?;
                map.serialize_entry("message", message)?;
                map.end()
            }
            Envelope::ProtocolError { error } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let serde_json::Value::Object(mut map) = value else {
            return Err(D::Error::custom("envelope must be a JSON object"));
        };

        if let Some(action) = map.remove("action") {
            let Some(action) = action.as_str().map(str::to_string) else {
                return Err(D::Error::custom("action must be a string"));
            };
            if action == "error" {
                let message = map
                    .remove("message")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                return Ok(Envelope::ActionError { message });
            }
            return Ok(Envelope::Event { action, data: map });
        }

        if let Some(error) = map.remove("error") {
            let error = error.as_str().map(str::to_string).unwrap_or_default();
            return Ok(Envelope::ProtocolError { error });
        }

        Err(D::Error::custom("envelope has neither action nor error"))
    }
}

// =============================================================================
// INBOUND REQUESTS
// =============================================================================

/// Why an inbound message could not be parsed into a request. The display
/// string is sent to the client verbatim as a protocol error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("No action specified")]
    NoAction,
}

/// A parsed inbound request: the action name, the optional reply redirect,
/// and every remaining top-level field as arguments.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    pub to_user_id: Option<i64>,
    pub data: Data,
}

impl ActionRequest {
    /// Parse one inbound text message.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::InvalidJson` if the text is not a JSON object and
    /// `ParseError::NoAction` if it lacks a string `action` field.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ParseError::InvalidJson)?;
        let serde_json::Value::Object(mut map) = value else {
            return Err(ParseError::InvalidJson);
        };

        let action = map
            .remove("action")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or(ParseError::NoAction)?;

        let to_user_id = map.remove("to_user_id").and_then(|v| v.as_i64());

        Ok(Self { action, to_user_id, data: map })
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
