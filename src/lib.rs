#![forbid(unsafe_code)]

//! Host-side harness for autonomous coding-agent sessions.
//!
//! Each session pairs a goal with an execution engine and runs inside an
//! isolated container. The host drives the session state machine, relays
//! commands over a file-system bus mounted into the container, persists
//! authoritative state in `SQLite`, and tears the container down on every
//! exit path.

pub mod bus;
pub mod config;
pub mod container;
pub mod engine;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
