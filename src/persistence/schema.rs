//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every daemon startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS task (
    id              TEXT PRIMARY KEY NOT NULL,
    parent_task_id  TEXT,
    depth           INTEGER NOT NULL DEFAULT 0,
    goal            TEXT NOT NULL,
    mode            TEXT NOT NULL CHECK(mode IN ('closed','interactive')),
    engine          TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('pending','running','succeeded','failed','cancelled')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    FOREIGN KEY(parent_task_id) REFERENCES task(id)
);

CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    task_id         TEXT NOT NULL,
    engine          TEXT NOT NULL,
    container_id    TEXT,
    bus_root        TEXT NOT NULL,
    state           TEXT NOT NULL CHECK(state IN ('created','starting','running','succeeded','failed','timed_out','cancelled','reaped')),
    outcome         TEXT CHECK(outcome IN ('succeeded','failed','timed_out','cancelled')),
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    exit_summary    TEXT,
    FOREIGN KEY(task_id) REFERENCES task(id)
);

CREATE TABLE IF NOT EXISTS session_event (
    session_id      TEXT NOT NULL,
    seq             INTEGER NOT NULL,
    kind            TEXT NOT NULL,
    detail          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (session_id, seq)
);

CREATE TABLE IF NOT EXISTS ask (
    id              TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL,
    message_id      TEXT NOT NULL,
    text            TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('pending','answered','expired')),
    created_at      TEXT NOT NULL,
    answered_at     TEXT,
    answer          TEXT
);

CREATE TABLE IF NOT EXISTS processed_message (
    message_id      TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL,
    response_json   TEXT NOT NULL,
    processed_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_task ON session(task_id);
CREATE INDEX IF NOT EXISTS idx_session_state ON session(state);
CREATE INDEX IF NOT EXISTS idx_ask_session ON ask(session_id, status);
";

    for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
