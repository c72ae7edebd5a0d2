//! Task repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::task::{Task, TaskMode, TaskStatus};
use crate::{AppError, Result};

/// Repository wrapper around `SQLite` for task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<SqlitePool>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    parent_task_id: Option<String>,
    depth: i64,
    goal: String,
    mode: String,
    engine: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let mode = TaskMode::parse(&self.mode)
            .map_err(|bad| AppError::Db(format!("invalid task mode: {bad}")))?;
        let status = TaskStatus::parse(&self.status)
            .map_err(|bad| AppError::Db(format!("invalid task status: {bad}")))?;
        Ok(Task {
            id: self.id,
            parent_task_id: self.parent_task_id,
            depth: u32::try_from(self.depth)
                .map_err(|_| AppError::Db("negative task depth".into()))?,
            goal: self.goal,
            mode,
            engine: self.engine,
            status,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn parse_ts(s: &str) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))
}

const SELECT_COLS: &str =
    "SELECT id, parent_task_id, depth, goal, mode, engine, status, created_at, updated_at FROM task";

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new task record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, task: &Task) -> Result<Task> {
        sqlx::query(
            "INSERT INTO task (id, parent_task_id, depth, goal, mode, engine, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&task.id)
        .bind(&task.parent_task_id)
        .bind(i64::from(task.depth))
        .bind(&task.goal)
        .bind(task.mode.as_str())
        .bind(&task.engine)
        .bind(task.status.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(task.clone())
    }

    /// Retrieve a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!("{SELECT_COLS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.ok_or_else(|| AppError::NotFound(format!("task {id} not found")))?
            .into_task()
    }

    /// Update task status and `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let result = sqlx::query("UPDATE task SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("task {id} not found")));
        }
        self.get_by_id(id).await
    }

    /// List all tasks, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!("{SELECT_COLS} ORDER BY created_at ASC"))
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }
}
