//! Session manager: the front door for callers.
//!
//! Creates task/session records, launches control loops, relays
//! cancellation and steering, and reconciles sessions left behind by a
//! prior host crash.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, info_span, warn, Instrument};

use crate::container::ProbeStatus;
use crate::engine::Engine;
use crate::models::event::{EventKind, SessionEvent};
use crate::models::session::{Session, SessionState};
use crate::models::task::{Task, TaskMode, TaskStatus};
use crate::{AppError, Result};

use super::control_loop;
use super::HarnessState;

/// Structured status snapshot returned to callers.
///
/// Always reflects the latest committed state, including the failure
/// detail — a caller never needs to inspect container internals to
/// understand why a session ended.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Owning task.
    pub task: Task,
    /// Sessions attempted for the task, oldest first.
    pub sessions: Vec<Session>,
}

/// Front door for session orchestration.
#[derive(Clone)]
pub struct SessionManager {
    state: Arc<HarnessState>,
}

impl SessionManager {
    /// Wrap shared state.
    #[must_use]
    pub fn new(state: Arc<HarnessState>) -> Self {
        Self { state }
    }

    /// The shared state bundle.
    #[must_use]
    pub fn state(&self) -> &Arc<HarnessState> {
        &self.state
    }

    /// Request a new root session for a goal.
    ///
    /// Creates the task and session records, then launches the control
    /// loop. Returns once the session is accepted, not once it finishes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown engine or when the
    /// concurrent-session limit is reached.
    pub async fn request_session(
        &self,
        goal: &str,
        mode: TaskMode,
        engine_id: &str,
    ) -> Result<(Task, Session)> {
        let task = Task::new(goal.to_owned(), mode, engine_id.to_owned());
        self.admit(task).await
    }

    /// Request a nested session under a parent task (the `spawn` command).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the depth or concurrency budget is
    /// exhausted, or for an unknown engine.
    pub async fn request_child_session(
        &self,
        parent: &Task,
        goal: &str,
        mode: TaskMode,
        engine_id: &str,
    ) -> Result<(Task, Session)> {
        if parent.depth + 1 > self.state.config.max_depth {
            return Err(AppError::Config(format!(
                "max task depth {} exceeded",
                self.state.config.max_depth
            )));
        }
        let task = Task::child_of(parent, goal.to_owned(), mode, engine_id.to_owned());
        self.admit(task).await
    }

    async fn admit(&self, task: Task) -> Result<(Task, Session)> {
        let span = info_span!("request_session", task_id = task.id, engine = task.engine);
        async {
            // Engine must be known and configured before anything persists.
            Engine::from_id(&task.engine)?;
            self.state.config.engine(&task.engine)?;

            let active = self.state.sessions().count_active().await?;
            if active >= u64::from(self.state.config.max_concurrent_sessions) {
                return Err(AppError::Config(format!(
                    "concurrent session limit reached ({active}/{})",
                    self.state.config.max_concurrent_sessions
                )));
            }

            let task = self.state.tasks().create(&task).await?;
            let mut session = Session::new(task.id.clone(), task.engine.clone(), String::new());
            // The bus root embeds the session id, which exists only now.
            session.bus_root = self
                .state
                .config
                .bus_root(&session.id)
                .display()
                .to_string();
            let session = self.state.sessions().create(&session).await?;

            info!(session_id = session.id, "session accepted");
            self.spawn_loop(&session.id);
            Ok((task, session))
        }
        .instrument(span)
        .await
    }

    /// Launch the control loop task for a session.
    pub fn spawn_loop(&self, session_id: &str) {
        let state = Arc::clone(&self.state);
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            control_loop::run(state, session_id).await;
        });
    }

    /// Durably request cancellation of a session.
    ///
    /// The control loop observes the flag on its next tick, delivers a
    /// control `cancel` message, grants the grace period, then kills.
    /// Cancelling an already-finished session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        let session = self.state.sessions().get_by_id(session_id).await?;
        if session.state.is_final() {
            info!(session_id, state = session.state.as_str(), "cancel on finished session ignored");
            return Ok(());
        }
        self.state.sessions().request_cancel(session_id).await?;
        info!(session_id, "cancellation requested");
        Ok(())
    }

    /// Status snapshot by session id or task id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when neither a session nor a task
    /// matches the id.
    pub async fn get_status(&self, id: &str) -> Result<StatusSnapshot> {
        let task_id = match self.state.sessions().get_by_id(id).await {
            Ok(session) => session.task_id,
            Err(AppError::NotFound(_)) => id.to_owned(),
            Err(err) => return Err(err),
        };
        let task = self.state.tasks().get_by_id(&task_id).await?;
        let sessions = self.state.sessions().list_by_task(&task_id).await?;
        Ok(StatusSnapshot { task, sessions })
    }

    /// Resolve the oldest pending steering question for a session.
    ///
    /// The answer is recorded durably here; the session's control loop
    /// relays it to the container as the `ask` response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no steering question is pending.
    pub async fn submit_steering(&self, session_id: &str, answer: &str) -> Result<()> {
        let ask = self
            .state
            .asks()
            .oldest_pending(session_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no pending steering question for {session_id}"))
            })?;
        self.state.asks().resolve(&ask.id, answer).await?;
        self.state
            .record_event(session_id, EventKind::AskAnswered, &format!("ask {}", ask.id))
            .await?;
        info!(session_id, ask_id = ask.id, "steering answer recorded");
        Ok(())
    }

    /// Subscribe to the live event feed (all sessions).
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events_tx.subscribe()
    }

    /// Replay a session's event log from a sequence number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_events(
        &self,
        session_id: &str,
        after_seq: i64,
    ) -> Result<Vec<SessionEvent>> {
        self.state.events().list_after(session_id, after_seq).await
    }

    /// Reconcile sessions left behind by a prior host crash.
    ///
    /// Unfinished sessions whose container still runs get their control
    /// loop back; the rest are failed, torn down, and reaped. Terminal
    /// sessions that never reached `Reaped` get their cleanup finished.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store cannot be read.
    pub async fn recover(&self) -> Result<()> {
        let sessions = self.state.sessions();

        for session in sessions.list_unfinished().await? {
            let resume = match (&session.container_id, session.state) {
                (Some(container_id), SessionState::Running) => {
                    let handle = crate::container::ContainerHandle {
                        container_id: container_id.clone(),
                        session_id: session.id.clone(),
                    };
                    matches!(
                        self.state.runtime.probe(&handle).await,
                        Ok(ProbeStatus::Running)
                    )
                }
                _ => false,
            };

            if resume {
                info!(session_id = session.id, "re-attaching to running session");
                self.spawn_loop(&session.id);
            } else {
                warn!(
                    session_id = session.id,
                    state = session.state.as_str(),
                    "session orphaned by restart; failing"
                );
                let detail = "host restart: container not running";
                match session.state {
                    SessionState::Created | SessionState::Starting | SessionState::Running => {
                        // Created has no edge to Failed; walk it forward first.
                        if session.state == SessionState::Created {
                            let _ = self
                                .state
                                .transition_logged(&session.id, SessionState::Starting, None)
                                .await;
                        }
                        if let Err(err) = self
                            .state
                            .transition_logged(&session.id, SessionState::Failed, Some(detail))
                            .await
                        {
                            warn!(session_id = session.id, %err, "recovery transition failed");
                            continue;
                        }
                        self.spawn_loop(&session.id);
                    }
                    _ => {}
                }
            }
        }

        // Finish cleanup for sessions that ended but were never reaped.
        for session in sessions.list_unreaped().await? {
            info!(session_id = session.id, "finishing interrupted cleanup");
            self.spawn_loop(&session.id);
        }

        Ok(())
    }
}
