//! Dedup ledger for bus message processing.
//!
//! A message counts as delivered once its id is recorded here together
//! with the response that was written for it. Redelivery after a crash
//! then becomes a no-op that re-sends the cached response.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::Result;

/// Repository for the processed-message ledger.
#[derive(Clone)]
pub struct ProcessedRepo {
    db: Arc<SqlitePool>,
}

impl ProcessedRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Cached response JSON for a message id, if already processed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn lookup(&self, message_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT response_json FROM processed_message WHERE message_id = ?1")
                .bind(message_id)
                .fetch_optional(self.db.as_ref())
                .await?;
        Ok(row.map(|(json,)| json))
    }

    /// Record a message as processed with its response. Recording the
    /// same id twice keeps the first entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record(
        &self,
        message_id: &str,
        session_id: &str,
        response_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO processed_message \
             (message_id, session_id, response_json, processed_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(message_id)
        .bind(session_id)
        .bind(response_json)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}
