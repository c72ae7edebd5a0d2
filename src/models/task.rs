//! Task model: one unit of work, executed by 1..N sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution mode for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Run until the goal is met, without operator involvement.
    Closed,
    /// Operator answers steering questions along the way.
    Interactive,
}

impl TaskMode {
    /// Stable string form used in persistence and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Interactive => "interactive",
        }
    }

    /// Parse the stable string form.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input on failure.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "closed" => Ok(Self::Closed),
            "interactive" => Ok(Self::Interactive),
            other => Err(other.to_owned()),
        }
    }
}

/// Lifecycle status for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, no session running yet.
    Pending,
    /// A session is executing the task.
    Running,
    /// A session completed the goal.
    Succeeded,
    /// The last session failed or timed out.
    Failed,
    /// Cancelled by external request.
    Cancelled,
}

impl TaskStatus {
    /// Stable string form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input on failure.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(other.to_owned()),
        }
    }
}

/// Task domain entity. Retained after completion for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique record identifier.
    pub id: String,
    /// Parent task when spawned as a sub-task.
    pub parent_task_id: Option<String>,
    /// Nesting depth; root tasks are 0.
    pub depth: u32,
    /// Goal description driving the agent.
    pub goal: String,
    /// Execution mode.
    pub mode: TaskMode,
    /// Engine identifier.
    pub engine: String,
    /// Current status. Mutated only by session transitions.
    pub status: TaskStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a new root task.
    #[must_use]
    pub fn new(goal: String, mode: TaskMode, engine: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            parent_task_id: None,
            depth: 0,
            goal,
            mode,
            engine,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct a sub-task nested under `parent`.
    #[must_use]
    pub fn child_of(parent: &Task, goal: String, mode: TaskMode, engine: String) -> Self {
        let mut task = Self::new(goal, mode, engine);
        task.parent_task_id = Some(parent.id.clone());
        task.depth = parent.depth + 1;
        task
    }
}
