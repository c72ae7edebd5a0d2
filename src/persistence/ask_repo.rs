//! Durable records of pending steering questions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{AppError, Result};

/// Resolution state of a steering question.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AskStatus {
    /// Awaiting an operator answer.
    Pending,
    /// Answer recorded and relayed.
    Answered,
    /// Deadline passed without an answer.
    Expired,
}

impl AskStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Expired => "expired",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "answered" => Ok(Self::Answered),
            "expired" => Ok(Self::Expired),
            other => Err(AppError::Db(format!("invalid ask status: {other}"))),
        }
    }
}

/// A steering question raised by an in-container agent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Ask {
    /// Unique record identifier.
    pub id: String,
    /// Session that raised the question.
    pub session_id: String,
    /// Bus message id of the originating `ask` request.
    pub message_id: String,
    /// Question text shown to the operator.
    pub text: String,
    /// Resolution state.
    pub status: AskStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Resolution timestamp.
    pub answered_at: Option<DateTime<Utc>>,
    /// Operator answer, present once answered.
    pub answer: Option<String>,
}

impl Ask {
    /// Construct a pending ask for a session.
    #[must_use]
    pub fn new(session_id: String, message_id: String, text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            message_id,
            text,
            status: AskStatus::Pending,
            created_at: Utc::now(),
            answered_at: None,
            answer: None,
        }
    }
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AskRow {
    id: String,
    session_id: String,
    message_id: String,
    text: String,
    status: String,
    created_at: String,
    answered_at: Option<String>,
    answer: Option<String>,
}

impl AskRow {
    fn into_ask(self) -> Result<Ask> {
        Ok(Ask {
            id: self.id,
            session_id: self.session_id,
            message_id: self.message_id,
            text: self.text,
            status: AskStatus::parse(&self.status)?,
            created_at: parse_ts(&self.created_at)?,
            answered_at: self.answered_at.as_deref().map(parse_ts).transpose()?,
            answer: self.answer,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))
}

const SELECT_COLS: &str =
    "SELECT id, session_id, message_id, text, status, created_at, answered_at, answer FROM ask";

/// Repository for steering question records.
#[derive(Clone)]
pub struct AskRepo {
    db: Arc<SqlitePool>,
}

impl AskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new pending ask.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, ask: &Ask) -> Result<Ask> {
        sqlx::query(
            "INSERT INTO ask (id, session_id, message_id, text, status, created_at, answered_at, answer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&ask.id)
        .bind(&ask.session_id)
        .bind(&ask.message_id)
        .bind(&ask.text)
        .bind(ask.status.as_str())
        .bind(ask.created_at.to_rfc3339())
        .bind(ask.answered_at.map(|t| t.to_rfc3339()))
        .bind(&ask.answer)
        .execute(self.db.as_ref())
        .await?;
        Ok(ask.clone())
    }

    /// Retrieve an ask by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the ask does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Ask> {
        let row: Option<AskRow> = sqlx::query_as(&format!("{SELECT_COLS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.ok_or_else(|| AppError::NotFound(format!("ask {id} not found")))?
            .into_ask()
    }

    /// Oldest pending ask for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn oldest_pending(&self, session_id: &str) -> Result<Option<Ask>> {
        let row: Option<AskRow> = sqlx::query_as(&format!(
            "{SELECT_COLS} WHERE session_id = ?1 AND status = 'pending' \
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(AskRow::into_ask).transpose()
    }

    /// Record an operator answer on a pending ask.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the ask is no longer pending.
    pub async fn resolve(&self, id: &str, answer: &str) -> Result<Ask> {
        let result = sqlx::query(
            "UPDATE ask SET status = 'answered', answer = ?1, answered_at = ?2 \
             WHERE id = ?3 AND status = 'pending'",
        )
        .bind(answer)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("ask {id} is not pending")));
        }
        self.get_by_id(id).await
    }

    /// Mark a pending ask expired. Expiring a resolved ask is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn expire(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ask SET status = 'expired', answered_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}
