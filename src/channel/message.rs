//! Message envelopes exchanged over the channel

use super::ChannelError;
use crate::events::{MSG_CONNECTED, MSG_ERROR};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request sent to the backend: `{type, requestId, ...payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl OutboundMessage {
    /// Create a message with an empty payload
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id: None,
            payload: Map::new(),
        }
    }

    /// Create a message whose payload fields come from a serializable struct
    pub fn with_payload<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, ChannelError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ChannelError::Serialization(format!(
                    "Message payload must be a JSON object, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            kind: kind.into(),
            request_id: None,
            payload,
        })
    }

    /// Attach a correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Decode the payload fields into a typed struct
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ChannelError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| ChannelError::Protocol(format!("Invalid '{}' payload: {}", self.kind, e)))
    }

    /// Serialize to a text frame
    pub fn to_text(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A message received from the backend.
///
/// Responses carry `success` plus `data` or `error`; push notifications carry
/// their fields at the top level (kept in `extra`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundMessage {
    /// Parse a text frame. Frames without a string `type` are rejected.
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Protocol(format!("Malformed frame: {}", e)))
    }

    /// Successful response carrying `data`
    pub fn success<T: Serialize>(
        kind: impl Into<String>,
        request_id: Option<String>,
        data: &T,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            kind: kind.into(),
            request_id,
            success: Some(true),
            data: Some(serde_json::to_value(data)?),
            error: None,
            extra: Map::new(),
        })
    }

    /// Failure response of a specific type
    pub fn failure(kind: impl Into<String>, request_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id,
            success: Some(false),
            data: None,
            error: Some(Value::String(error.into())),
            extra: Map::new(),
        }
    }

    /// Generic `error` message
    pub fn error(request_id: Option<String>, error: impl Into<String>) -> Self {
        Self::failure(MSG_ERROR, request_id, error)
    }

    /// Connection acknowledgement
    pub fn connected() -> Self {
        Self {
            kind: MSG_CONNECTED.to_string(),
            request_id: None,
            success: None,
            data: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Push notification with top-level fields
    pub fn push<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, ChannelError> {
        let extra = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            kind: kind.into(),
            request_id: None,
            success: None,
            data: None,
            error: None,
            extra,
        })
    }

    /// Whether this message signals a failure
    pub fn is_failure(&self) -> bool {
        self.kind == MSG_ERROR || self.success == Some(false)
    }

    /// Human-readable error carried by a failure message
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(obj)) => obj
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
            Some(other) => other.to_string(),
            None => self
                .extra
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string(),
        }
    }

    /// Convert a correlated response into the caller's outcome
    pub fn into_outcome(self) -> Result<Value, ChannelError> {
        if self.is_failure() {
            return Err(ChannelError::Remote(self.error_message()));
        }
        Ok(self.data.unwrap_or(Value::Null))
    }

    /// Decode a push notification's top-level fields into a typed struct
    pub fn push_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, ChannelError> {
        serde_json::from_value(Value::Object(self.extra.clone()))
            .map_err(|e| ChannelError::Protocol(format!("Invalid '{}' push: {}", self.kind, e)))
    }

    pub fn to_text(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }
}
