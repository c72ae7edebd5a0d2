//! Append-only session event log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a session event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Lifecycle state changed.
    StateChanged,
    /// Inbound bus message accepted.
    MessageReceived,
    /// Outbound bus message written.
    MessageSent,
    /// Container created, started, exited, signalled, or removed.
    Container,
    /// Malformed or contradictory bus message rejected.
    ProtocolError,
    /// Steering question raised by the agent.
    AskRaised,
    /// Steering question answered by the operator.
    AskAnswered,
    /// Steering question expired without an answer.
    AskExpired,
}

impl EventKind {
    /// Stable string form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateChanged => "state_changed",
            Self::MessageReceived => "message_received",
            Self::MessageSent => "message_sent",
            Self::Container => "container",
            Self::ProtocolError => "protocol_error",
            Self::AskRaised => "ask_raised",
            Self::AskAnswered => "ask_answered",
            Self::AskExpired => "ask_expired",
        }
    }

    /// Parse the stable string form.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input on failure.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "state_changed" => Ok(Self::StateChanged),
            "message_received" => Ok(Self::MessageReceived),
            "message_sent" => Ok(Self::MessageSent),
            "container" => Ok(Self::Container),
            "protocol_error" => Ok(Self::ProtocolError),
            "ask_raised" => Ok(Self::AskRaised),
            "ask_answered" => Ok(Self::AskAnswered),
            "ask_expired" => Ok(Self::AskExpired),
            other => Err(other.to_owned()),
        }
    }
}

/// One immutable entry in a session's ordered event log.
///
/// `seq` is assigned transactionally by the store: strictly increasing per
/// session, no gaps. Cross-session ordering is unspecified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionEvent {
    /// Session the entry belongs to.
    pub session_id: String,
    /// Per-session monotonic sequence number, starting at 1.
    pub seq: i64,
    /// Event classification.
    pub kind: EventKind,
    /// Human-readable cause or payload summary.
    pub detail: String,
    /// Wall-clock timestamp (informational; ordering comes from `seq`).
    pub created_at: DateTime<Utc>,
}
