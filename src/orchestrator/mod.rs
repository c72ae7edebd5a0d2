//! Session orchestration: state machine, command dispatch, cleanup.
//!
//! One independent control loop per active session. Loops never share
//! in-memory state with each other — coordination flows through the
//! state store and the bus, so a loop could equally run as a separate
//! process without design changes.

pub mod artifacts;
pub mod control_loop;
pub mod dispatch;
pub mod manager;

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::container::ContainerRuntime;
use crate::models::event::{EventKind, SessionEvent};
use crate::persistence::ask_repo::AskRepo;
use crate::persistence::event_repo::EventRepo;
use crate::persistence::processed_repo::ProcessedRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::{GlobalConfig, Result};

/// Buffered capacity of the live event feed.
const EVENT_FEED_CAPACITY: usize = 256;

/// Shared dependencies handed to every control loop.
pub struct HarnessState {
    /// Parsed global configuration.
    pub config: Arc<GlobalConfig>,
    /// State database pool.
    pub db: Arc<SqlitePool>,
    /// Container runtime implementation.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Live event feed for viewer subscriptions.
    pub events_tx: broadcast::Sender<SessionEvent>,
    /// Daemon-wide shutdown signal.
    pub shutdown: CancellationToken,
}

impl HarnessState {
    /// Bundle shared dependencies.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        db: Arc<SqlitePool>,
        runtime: Arc<dyn ContainerRuntime>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_FEED_CAPACITY);
        Arc::new(Self {
            config,
            db,
            runtime,
            events_tx,
            shutdown,
        })
    }

    /// Task repository bound to the shared pool.
    #[must_use]
    pub fn tasks(&self) -> TaskRepo {
        TaskRepo::new(Arc::clone(&self.db))
    }

    /// Session repository bound to the shared pool.
    #[must_use]
    pub fn sessions(&self) -> SessionRepo {
        SessionRepo::new(Arc::clone(&self.db))
    }

    /// Event repository bound to the shared pool.
    #[must_use]
    pub fn events(&self) -> EventRepo {
        EventRepo::new(Arc::clone(&self.db))
    }

    /// Ask repository bound to the shared pool.
    #[must_use]
    pub fn asks(&self) -> AskRepo {
        AskRepo::new(Arc::clone(&self.db))
    }

    /// Processed-message ledger bound to the shared pool.
    #[must_use]
    pub fn processed(&self) -> ProcessedRepo {
        ProcessedRepo::new(Arc::clone(&self.db))
    }

    /// Append an event and publish it on the live feed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the append fails.
    pub async fn record_event(
        &self,
        session_id: &str,
        kind: EventKind,
        detail: &str,
    ) -> Result<SessionEvent> {
        let event = self.events().append(session_id, kind, detail).await?;
        // No subscribers is fine; the durable log is authoritative.
        let _ = self.events_tx.send(event.clone());
        Ok(event)
    }

    /// Record an event where failure must not abort the caller's path
    /// (teardown, cancellation). Failures are logged and swallowed.
    pub async fn record_event_best_effort(&self, session_id: &str, kind: EventKind, detail: &str) {
        if let Err(err) = self.record_event(session_id, kind, detail).await {
            warn!(session_id, %err, "failed to record event");
        }
    }

    /// Apply a transition and log it as a state-change event.
    ///
    /// An idempotent replay (the store reports no state change) records
    /// nothing, so redelivered outcomes leave a single event behind.
    ///
    /// # Errors
    ///
    /// Propagates `AppError::Conflict` from the store for illegal or
    /// contradictory transitions.
    pub async fn transition_logged(
        &self,
        session_id: &str,
        next: crate::models::session::SessionState,
        detail: Option<&str>,
    ) -> Result<crate::models::session::Session> {
        let before = self.sessions().get_by_id(session_id).await?;
        let after = self.sessions().transition(session_id, next, detail).await?;
        if before.state != after.state {
            let cause = detail.map_or_else(String::new, |d| format!(" ({d})"));
            self.record_event(
                session_id,
                EventKind::StateChanged,
                &format!("{} -> {}{cause}", before.state.as_str(), next.as_str()),
            )
            .await?;
        }
        Ok(after)
    }
}
