//! Bus message envelope and command vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command vocabulary of the host↔container bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Container requests a nested task/session pair.
    Spawn,
    /// Container blocks until a referenced session reaches a terminal state.
    Wait,
    /// Container requests steering input from the operator.
    Ask,
    /// Container reports the final session outcome.
    Result,
    /// Container signals liveness; refreshes the idle clock.
    Heartbeat,
    /// Host answer to an inbound request.
    Response,
    /// Host rejection of a malformed or contradictory request.
    Error,
    /// Host-initiated steering delivery on the control channel.
    Steer,
    /// Host-initiated cancellation on the control channel.
    Cancel,
}

impl MessageKind {
    /// Stable string form used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Wait => "wait",
            Self::Ask => "ask",
            Self::Result => "result",
            Self::Heartbeat => "heartbeat",
            Self::Response => "response",
            Self::Error => "error",
            Self::Steer => "steer",
            Self::Cancel => "cancel",
        }
    }

    /// Whether the kind is valid as a container→host request.
    #[must_use]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::Spawn | Self::Wait | Self::Ask | Self::Result | Self::Heartbeat
        )
    }
}

/// A single IPC unit: written once, read once by the intended consumer,
/// never mutated after being written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BusMessage {
    /// Unique message identifier.
    pub id: String,
    /// Request id this message answers, for responses and errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Command kind.
    pub kind: MessageKind,
    /// Command payload; shape depends on `kind`.
    pub payload: serde_json::Value,
    /// Write timestamp (informational; ordering comes from file sequence).
    pub written_at: DateTime<Utc>,
}

impl BusMessage {
    /// Construct a request message with a fresh id.
    #[must_use]
    pub fn request(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: None,
            kind,
            payload,
            written_at: Utc::now(),
        }
    }

    /// Construct a `Response` correlated to `request_id`.
    #[must_use]
    pub fn response(request_id: &str, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: Some(request_id.to_owned()),
            kind: MessageKind::Response,
            payload,
            written_at: Utc::now(),
        }
    }

    /// Construct an `Error` correlated to `request_id`.
    #[must_use]
    pub fn error(request_id: &str, detail: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: Some(request_id.to_owned()),
            kind: MessageKind::Error,
            payload: serde_json::json!({ "detail": detail }),
            written_at: Utc::now(),
        }
    }

    /// Construct a control-channel message (`Steer` or `Cancel`).
    #[must_use]
    pub fn control(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id: None,
            kind,
            payload,
            written_at: Utc::now(),
        }
    }
}
