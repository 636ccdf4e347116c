//! Error type for the message channel and the operations built on it

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of channel requests.
///
/// Connectivity failures, response timeouts and backend-reported failures are
/// separate variants so callers can tell them apart without string matching.
/// Only the `Timeout` variant renders with "timed out".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connection to {url} was not established within {after:?}")]
    ConnectTimeout { url: String, after: Duration },

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Request '{request_type}' timed out after {after:?} waiting for '{expected}'")]
    Timeout {
        request_type: String,
        expected: String,
        after: Duration,
    },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ChannelError {
    /// No correlated response arrived in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }

    /// The channel could not be opened or dropped mid-flight
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ChannelError::Connect { .. } | ChannelError::ConnectTimeout { .. } | ChannelError::Closed(_)
        )
    }

    /// The backend answered with an explicit failure
    pub fn is_remote(&self) -> bool {
        matches!(self, ChannelError::Remote(_))
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Serialization(err.to_string())
    }
}
