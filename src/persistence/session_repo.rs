//! Session repository for `SQLite` persistence.
//!
//! `transition` is the single mutation point for session state. It
//! enforces the lifecycle state machine with an optimistic prior-state
//! guard, so two racing callers serialize: the loser observes `Conflict`
//! instead of silently overwriting the winner.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::session::{Session, SessionState};
use crate::{AppError, Result};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    task_id: String,
    engine: String,
    container_id: Option<String>,
    bus_root: String,
    state: String,
    cancel_requested: i64,
    started_at: String,
    ended_at: Option<String>,
    exit_summary: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let state = SessionState::parse(&self.state)
            .map_err(|bad| AppError::Db(format!("invalid session state: {bad}")))?;
        Ok(Session {
            id: self.id,
            task_id: self.task_id,
            engine: self.engine,
            container_id: self.container_id,
            bus_root: self.bus_root,
            state,
            cancel_requested: self.cancel_requested != 0,
            started_at: parse_ts(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_ts).transpose()?,
            exit_summary: self.exit_summary,
        })
    }
}

fn parse_ts(s: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))
}

const SELECT_COLS: &str = "SELECT id, task_id, engine, container_id, bus_root, state, \
     cancel_requested, started_at, ended_at, exit_summary FROM session";

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            "INSERT INTO session (id, task_id, engine, container_id, bus_root, state, \
             cancel_requested, started_at, ended_at, exit_summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&session.id)
        .bind(&session.task_id)
        .bind(&session.engine)
        .bind(&session.container_id)
        .bind(&session.bus_root)
        .bind(session.state.as_str())
        .bind(i64::from(session.cancel_requested))
        .bind(session.started_at.to_rfc3339())
        .bind(session.ended_at.map(|t| t.to_rfc3339()))
        .bind(&session.exit_summary)
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!("{SELECT_COLS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?
            .into_session()
    }

    /// List sessions for a task, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_task(&self, task_id: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as(&format!("{SELECT_COLS} WHERE task_id = ?1 ORDER BY started_at ASC"))
                .bind(task_id)
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// List sessions that have not reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_unfinished(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "{SELECT_COLS} WHERE state IN ('created','starting','running') ORDER BY started_at ASC"
        ))
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// List sessions that ended but were never cleaned up.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_unreaped(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "{SELECT_COLS} WHERE state IN ('succeeded','failed','timed_out','cancelled') \
             ORDER BY started_at ASC"
        ))
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Count sessions currently consuming a container slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_active(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM session WHERE state IN ('created','starting','running')",
        )
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Record the container handle once allocation succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn set_container(&self, id: &str, container_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE session SET container_id = ?1 WHERE id = ?2")
            .bind(container_id)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        Ok(())
    }

    /// Durably request cancellation. The control loop observes the flag on
    /// its next tick. Requesting twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn request_cancel(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE session SET cancel_requested = 1 WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        Ok(())
    }

    /// Apply a lifecycle transition.
    ///
    /// Terminal transitions record `detail` as the exit summary, the
    /// outcome, and the end timestamp. A re-entrant request for an
    /// already-recorded terminal state (or for `Reaped` on a reaped
    /// session) whose detail matches the stored summary is an idempotent
    /// no-op; a mismatch — and any edge the state machine forbids — is
    /// `Conflict`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` on an illegal or contradictory
    /// transition, `AppError::NotFound` if the session does not exist.
    pub async fn transition(
        &self,
        id: &str,
        next: SessionState,
        detail: Option<&str>,
    ) -> Result<Session> {
        let current = self.get_by_id(id).await?;

        if let Some(session) = Self::idempotent_replay(&current, next, detail)? {
            return Ok(session);
        }
        if !current.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "illegal transition {} -> {} for session {id}",
                current.state.as_str(),
                next.as_str()
            )));
        }

        let now = Utc::now().to_rfc3339();
        let result = if next.is_terminal() {
            sqlx::query(
                "UPDATE session SET state = ?1, outcome = ?1, exit_summary = ?2, ended_at = ?3 \
                 WHERE id = ?4 AND state = ?5",
            )
            .bind(next.as_str())
            .bind(detail)
            .bind(&now)
            .bind(id)
            .bind(current.state.as_str())
            .execute(self.db.as_ref())
            .await?
        } else {
            sqlx::query("UPDATE session SET state = ?1 WHERE id = ?2 AND state = ?3")
                .bind(next.as_str())
                .bind(id)
                .bind(current.state.as_str())
                .execute(self.db.as_ref())
                .await?
        };

        if result.rows_affected() == 0 {
            // Lost the race: someone else moved the session first. Replay
            // the idempotence check against the committed row, otherwise
            // report the conflict.
            let latest = self.get_by_id(id).await?;
            if let Some(session) = Self::idempotent_replay(&latest, next, detail)? {
                return Ok(session);
            }
            return Err(AppError::Conflict(format!(
                "transition to {} lost race; session {id} is now {}",
                next.as_str(),
                latest.state.as_str()
            )));
        }

        self.get_by_id(id).await
    }

    /// Decide whether a transition request merely repeats recorded state.
    ///
    /// Returns `Ok(Some(session))` for an exact repeat, `Ok(None)` when the
    /// request is a genuine transition, and `Conflict` when it contradicts
    /// the recorded outcome.
    fn idempotent_replay(
        current: &Session,
        next: SessionState,
        detail: Option<&str>,
    ) -> Result<Option<Session>> {
        if current.state == SessionState::Reaped {
            if next == SessionState::Reaped {
                return Ok(Some(current.clone()));
            }
            return Err(AppError::Conflict(format!(
                "session {} is reaped; no further transitions",
                current.id
            )));
        }
        if current.state.is_terminal() && next == current.state {
            if detail.is_none() || current.exit_summary.as_deref() == detail {
                return Ok(Some(current.clone()));
            }
            return Err(AppError::Conflict(format!(
                "session {} already {} with a different outcome detail",
                current.id,
                current.state.as_str()
            )));
        }
        Ok(None)
    }
}
