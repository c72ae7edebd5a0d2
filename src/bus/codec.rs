//! Message file naming and atomic read/write primitives.
//!
//! One JSON file per message, named `NNNNNN-<id>.json` where `NNNNNN` is
//! a per-directory sequence assigned at write time. Sequence order is
//! write order — never wall-clock order, so clock skew cannot reorder a
//! session's requests. Files are written to a temp file in the target
//! directory and atomically renamed into place, so a reader never sees a
//! partial message.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::models::message::BusMessage;
use crate::{AppError, Result};

/// Width of the zero-padded sequence prefix.
const SEQ_WIDTH: usize = 6;

/// A directory entry recognized as a message file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFile {
    /// Write-order sequence parsed from the file name.
    pub seq: u64,
    /// Message (or correlation) id parsed from the file name.
    pub file_id: String,
    /// Full path of the entry.
    pub path: PathBuf,
}

/// Parse `NNNNNN-<id>.json` into its sequence and id parts.
#[must_use]
pub fn parse_file_name(name: &str) -> Option<(u64, String)> {
    let stem = name.strip_suffix(".json")?;
    let (seq_part, id_part) = stem.split_at_checked(SEQ_WIDTH)?;
    let id = id_part.strip_prefix('-')?;
    if id.is_empty() {
        return None;
    }
    let seq: u64 = seq_part.parse().ok()?;
    Some((seq, id.to_owned()))
}

/// List message files in a directory, ordered by sequence.
///
/// Entries that do not match the naming contract are ignored.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be read.
pub fn scan(dir: &Path) -> Result<Vec<MessageFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((seq, file_id)) = parse_file_name(name) {
            files.push(MessageFile {
                seq,
                file_id,
                path: entry.path(),
            });
        }
    }
    files.sort_by_key(|f| f.seq);
    Ok(files)
}

/// Next write-order sequence for a directory.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be read.
pub fn next_seq(dir: &Path) -> Result<u64> {
    Ok(scan(dir)?.last().map_or(1, |f| f.seq + 1))
}

/// Write a message under `file_id` with the next sequence number.
///
/// The id component names the file; for responses the caller passes the
/// correlation id so a re-send after a crash is detectable by name.
///
/// # Errors
///
/// Returns `AppError::Io` if the write or rename fails.
pub fn write_message(dir: &Path, file_id: &str, message: &BusMessage) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(message)
        .map_err(|err| AppError::Protocol(format!("message serialization failed: {err}")))?;
    write_raw(dir, file_id, &json)
}

/// Write pre-serialized message bytes (used to re-send a cached response).
///
/// # Errors
///
/// Returns `AppError::Io` if the write or rename fails.
pub fn write_raw(dir: &Path, file_id: &str, json: &str) -> Result<PathBuf> {
    let seq = next_seq(dir)?;
    let target = dir.join(format!("{seq:0width$}-{file_id}.json", width = SEQ_WIDTH));

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.persist(&target)
        .map_err(|err| AppError::Io(format!("atomic rename failed: {err}")))?;
    Ok(target)
}

/// Parse a message file's contents.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the contents are not a valid message.
pub fn read_message(path: &Path) -> Result<BusMessage> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|err| AppError::Protocol(format!("unparseable message: {err}")))
}

/// Whether any entry in `dir` carries `file_id` as its id component.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be read.
pub fn contains_id(dir: &Path, file_id: &str) -> Result<bool> {
    Ok(scan(dir)?.iter().any(|f| f.file_id == file_id))
}
