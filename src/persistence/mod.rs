//! Persistence layer modules.
//!
//! The `SQLite` database is the single source of truth for tasks,
//! sessions, and events. Every mutating operation commits before
//! returning, so callers may assume the write survives an immediate
//! crash.

pub mod ask_repo;
pub mod db;
pub mod event_repo;
pub mod processed_repo;
pub mod schema;
pub mod session_repo;
pub mod task_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
