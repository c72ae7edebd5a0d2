//! Append-only event log repository.
//!
//! Sequence numbers are assigned inside the insert statement, so `seq`
//! per session is strictly increasing with no gaps regardless of how
//! many writers race; `SQLite` serializes the statement as one write.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::event::{EventKind, SessionEvent};
use crate::{AppError, Result};

/// Repository for the per-session event log.
#[derive(Clone)]
pub struct EventRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct EventRow {
    session_id: String,
    seq: i64,
    kind: String,
    detail: String,
    created_at: String,
}

impl EventRow {
    fn into_event(self) -> Result<SessionEvent> {
        let kind = EventKind::parse(&self.kind)
            .map_err(|bad| AppError::Db(format!("invalid event kind: {bad}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))?
            .with_timezone(&Utc);
        Ok(SessionEvent {
            session_id: self.session_id,
            seq: self.seq,
            kind,
            detail: self.detail,
            created_at,
        })
    }
}

impl EventRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Append an event and return it with its assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn append(
        &self,
        session_id: &str,
        kind: EventKind,
        detail: &str,
    ) -> Result<SessionEvent> {
        let now = Utc::now();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO session_event (session_id, seq, kind, detail, created_at)
             SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4
             FROM session_event WHERE session_id = ?1
             RETURNING seq",
        )
        .bind(session_id)
        .bind(kind.as_str())
        .bind(detail)
        .bind(now.to_rfc3339())
        .fetch_one(self.db.as_ref())
        .await?;

        Ok(SessionEvent {
            session_id: session_id.to_owned(),
            seq: row.0,
            kind,
            detail: detail.to_owned(),
            created_at: now,
        })
    }

    /// List all events for a session in sequence order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        self.list_after(session_id, 0).await
    }

    /// List events with `seq > after_seq`, for replay subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_after(&self, session_id: &str, after_seq: i64) -> Result<Vec<SessionEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT session_id, seq, kind, detail, created_at FROM session_event
             WHERE session_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )
        .bind(session_id)
        .bind(after_seq)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Count events of a given kind for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_kind(&self, session_id: &str, kind: EventKind) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM session_event WHERE session_id = ?1 AND kind = ?2",
        )
        .bind(session_id)
        .bind(kind.as_str())
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }
}
