//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Illegal or contradictory state transition.
    Conflict(String),
    /// Malformed or unknown bus message.
    Protocol(String),
    /// Container never reached `Running` within the startup budget.
    Startup(String),
    /// A bounded suspension exceeded its deadline.
    Timeout(String),
    /// The container runtime lost track of a container.
    Unreachable(String),
    /// Session cancelled by external request.
    Cancelled(String),
    /// Container runtime operation failure.
    Container(String),
    /// IPC communication failure.
    Ipc(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Unreachable(msg) => write!(f, "unreachable: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Container(msg) => write!(f, "container: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
