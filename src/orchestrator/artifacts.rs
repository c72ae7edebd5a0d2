//! Final session artifacts flushed at terminal transitions.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::session::Session;
use crate::Result;

/// Write the session's exit summary under its run directory.
///
/// Layout: `<harness_root>/runs/<task>/sessions/<session>/summary.md`.
/// Overwrites any previous flush for the same session.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory or file cannot be written.
pub fn flush_exit_summary(run_dir: &Path, session: &Session) -> Result<PathBuf> {
    fs::create_dir_all(run_dir)?;
    let path = run_dir.join("summary.md");

    let outcome = session.state.as_str();
    let summary = session.exit_summary.as_deref().unwrap_or("_None_");
    let ended = session
        .ended_at
        .map_or_else(|| "unknown".to_owned(), |t| t.to_rfc3339());

    let body = format!(
        "# Session Summary\n\n\
         - Session: `{id}`\n\
         - Task: `{task}`\n\
         - Engine: {engine}\n\
         - Outcome: {outcome}\n\
         - Ended: {ended}\n\n\
         ## Detail\n\n{summary}\n",
        id = session.id,
        task = session.task_id,
        engine = session.engine,
    );
    fs::write(&path, body)?;
    Ok(path)
}
