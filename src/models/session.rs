//! Session model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state for a session.
///
/// `Created → Starting → Running → {Succeeded, Failed, TimedOut,
/// Cancelled} → Reaped`. Reaped sessions never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Record exists; no container yet.
    Created,
    /// Container allocation in progress.
    Starting,
    /// Container up, bus watcher attached, agent executing.
    Running,
    /// Result message with success payload recorded.
    Succeeded,
    /// Failure payload, non-zero container exit, or exhausted retries.
    Failed,
    /// No progress within the idle deadline.
    TimedOut,
    /// External cancellation honored.
    Cancelled,
    /// Container torn down and events flushed; immutable.
    Reaped,
}

impl SessionState {
    /// Stable string form used in persistence and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Reaped => "reaped",
        }
    }

    /// Parse the stable string form.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input on failure.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "created" => Ok(Self::Created),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "cancelled" => Ok(Self::Cancelled),
            "reaped" => Ok(Self::Reaped),
            other => Err(other.to_owned()),
        }
    }

    /// Whether the state is one of the four outcome states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Whether the session has finished entirely, including cleanup.
    #[must_use]
    pub fn is_final(self) -> bool {
        self == Self::Reaped || self.is_terminal()
    }
}

/// Session domain entity: one attempt to execute a task in a container.
///
/// Retries produce new sessions; a completed session is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Owning task.
    pub task_id: String,
    /// Engine identifier, copied from the task at creation.
    pub engine: String,
    /// Opaque container reference; `None` until started.
    pub container_id: Option<String>,
    /// Bus root directory for this session.
    pub bus_root: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Durable cancellation flag checked by the control loop.
    pub cancel_requested: bool,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// End timestamp, set on the terminal transition.
    pub ended_at: Option<DateTime<Utc>>,
    /// Result summary or failure detail.
    pub exit_summary: Option<String>,
}

impl Session {
    /// Construct a new session for a task.
    #[must_use]
    pub fn new(task_id: String, engine: String, bus_root: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            engine,
            container_id: None,
            bus_root,
            state: SessionState::Created,
            cancel_requested: false,
            started_at: Utc::now(),
            ended_at: None,
            exit_summary: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self.state, next),
            (SessionState::Created, SessionState::Starting)
                | (
                    SessionState::Starting,
                    SessionState::Running | SessionState::Failed | SessionState::Cancelled
                )
                | (
                    SessionState::Running,
                    SessionState::Succeeded
                        | SessionState::Failed
                        | SessionState::TimedOut
                        | SessionState::Cancelled
                )
        ) || (self.state.is_terminal() && next == SessionState::Reaped)
    }
}
