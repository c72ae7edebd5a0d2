//! Global configuration parsing and validation.
//!
//! Every deadline, backoff, and interval the harness observes is a config
//! knob with a documented default — call sites never hard-code durations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Bus delivery tuning.
///
/// Inbox messages are detected by a `notify` watcher where the platform
/// supports it, with an unconditional poll tick as the fallback. The poll
/// interval is the documented upper bound on detection latency.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BusConfig {
    /// Poll tick for inbox scans, milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Configurable deadlines (seconds) for bounded suspensions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Budget for a container to reach `Running` after the first start attempt.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// Idle budget: no bus message within this window forces `TimedOut`.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Budget for a `wait` command's referenced session to reach a terminal state.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
    /// Grace period between a cancel signal and the unconditional kill.
    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,
}

fn default_startup_seconds() -> u64 {
    120
}

fn default_idle_seconds() -> u64 {
    900
}

fn default_wait_seconds() -> u64 {
    1200
}

fn default_cancel_grace_seconds() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_seconds: default_startup_seconds(),
            idle_seconds: default_idle_seconds(),
            wait_seconds: default_wait_seconds(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
        }
    }
}

/// Bounded retry policy for transient container-start failures.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum start attempts before the session fails.
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
    /// Initial backoff between attempts, milliseconds; doubles per attempt.
    #[serde(default = "default_start_backoff_ms")]
    pub start_backoff_ms: u64,
    /// Re-probe attempts when a container turns `Unreachable`.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
}

fn default_start_attempts() -> u32 {
    3
}

fn default_start_backoff_ms() -> u64 {
    500
}

fn default_probe_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            start_attempts: default_start_attempts(),
            start_backoff_ms: default_start_backoff_ms(),
            probe_attempts: default_probe_attempts(),
        }
    }
}

/// Container runtime settings shared by every engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContainerConfig {
    /// Runtime CLI binary.
    #[serde(default = "default_runtime_binary")]
    pub binary: String,
    /// Working directory inside the container.
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Network mode (`none` or `bridge`).
    #[serde(default = "default_network_mode")]
    pub network_mode: String,
    /// CPU limit passed to the runtime.
    #[serde(default = "default_cpus")]
    pub cpus: String,
    /// Memory limit passed to the runtime.
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Mount point of the bus root inside the container.
    #[serde(default = "default_bus_mount")]
    pub bus_mount: String,
}

fn default_runtime_binary() -> String {
    "docker".into()
}

fn default_workdir() -> String {
    "/workspace".into()
}

fn default_network_mode() -> String {
    "bridge".into()
}

fn default_cpus() -> String {
    "2".into()
}

fn default_memory() -> String {
    "6g".into()
}

fn default_bus_mount() -> String {
    "/harness-bus".into()
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            binary: default_runtime_binary(),
            workdir: default_workdir(),
            network_mode: default_network_mode(),
            cpus: default_cpus(),
            memory: default_memory(),
            bus_mount: default_bus_mount(),
        }
    }
}

/// Per-engine image and command table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Container image the engine runs in.
    #[serde(default = "default_image")]
    pub image: String,
    /// Agent executable inside the container.
    pub cmd: String,
    /// Arguments placed before the goal prompt.
    #[serde(default)]
    pub exec_args: Vec<String>,
    /// Extra environment for the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_image() -> String {
    "harness-agent:latest".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory holding state db, bus trees, and run artifacts.
    #[serde(default = "default_harness_root")]
    pub harness_root: PathBuf,
    /// Maximum concurrently running sessions across all tasks.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Maximum nesting depth for spawned sub-tasks.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Local socket name for the control IPC surface.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Bus tuning.
    #[serde(default)]
    pub bus: BusConfig,
    /// Deadline knobs.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Retry knobs.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Container runtime knobs.
    #[serde(default)]
    pub container: ContainerConfig,
    /// Engine tables keyed by engine identifier.
    #[serde(default)]
    pub engines: BTreeMap<String, EngineConfig>,
}

fn default_harness_root() -> PathBuf {
    PathBuf::from(".harness")
}

fn default_max_concurrent_sessions() -> u32 {
    3
}

fn default_max_depth() -> u32 {
    12
}

fn default_ipc_name() -> String {
    "agent-harness".into()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            harness_root: default_harness_root(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            max_depth: default_max_depth(),
            ipc_name: default_ipc_name(),
            bus: BusConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            container: ContainerConfig::default(),
            engines: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the document fails to parse or a knob
    /// fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bus.poll_interval_ms == 0 {
            return Err(AppError::Config("bus.poll_interval_ms must be > 0".into()));
        }
        if self.retry.start_attempts == 0 {
            return Err(AppError::Config("retry.start_attempts must be > 0".into()));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be > 0".into(),
            ));
        }
        for (id, engine) in &self.engines {
            if engine.cmd.is_empty() {
                return Err(AppError::Config(format!("engines.{id}.cmd must be set")));
            }
        }
        Ok(())
    }

    /// Path of the `SQLite` state database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.harness_root.join("state.sqlite3")
    }

    /// Bus root directory for a session.
    #[must_use]
    pub fn bus_root(&self, session_id: &str) -> PathBuf {
        self.harness_root.join("bus").join(session_id)
    }

    /// Artifact directory for a session, grouped under its task.
    #[must_use]
    pub fn session_run_dir(&self, task_id: &str, session_id: &str) -> PathBuf {
        self.harness_root
            .join("runs")
            .join(task_id)
            .join("sessions")
            .join(session_id)
    }

    /// Engine table lookup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no table exists for the identifier.
    pub fn engine(&self, id: &str) -> Result<&EngineConfig> {
        self.engines
            .get(id)
            .ok_or_else(|| AppError::Config(format!("no [engines.{id}] table configured")))
    }

    /// Poll tick as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.bus.poll_interval_ms)
    }

    /// Load and parse a config file from disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
        Self::from_toml_str(&text)
    }
}
