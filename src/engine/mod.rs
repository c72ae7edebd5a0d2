//! Engine adapters.
//!
//! Each supported engine implements the same capability pair: build the
//! container spec that runs it, and parse its `result` payload shape.
//! The enumeration is closed — adding an engine extends this module and
//! nothing in the session machinery.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ContainerConfig, EngineConfig};
use crate::container::ContainerSpec;
use crate::{AppError, Result};

/// Parsed outcome of a session's `result` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Whether the agent reports the goal met.
    pub success: bool,
    /// Agent-provided summary, recorded verbatim as the exit summary.
    pub summary: String,
}

/// Supported execution engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Codex CLI agent.
    Codex,
    /// Claude Code CLI agent.
    Claude,
}

impl Engine {
    /// Resolve an engine identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown identifier.
    pub fn from_id(id: &str) -> Result<Self> {
        match id {
            "codex" => Ok(Self::Codex),
            "claude" => Ok(Self::Claude),
            other => Err(AppError::Config(format!("unknown engine '{other}'"))),
        }
    }

    /// The engine's identifier.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
        }
    }

    /// Build the container spec for one session of this engine.
    ///
    /// The agent command is `<cmd> <exec_args…> <goal>`; the bus root is
    /// mounted at the configured mount point and announced through the
    /// environment so the in-container endpoint finds its directories.
    #[must_use]
    pub fn container_spec(
        self,
        engine_config: &EngineConfig,
        container_config: &ContainerConfig,
        goal: &str,
        bus_root: &Path,
        workspace: Option<&Path>,
    ) -> ContainerSpec {
        let mut agent_command = vec![engine_config.cmd.clone()];
        agent_command.extend(engine_config.exec_args.iter().cloned());
        agent_command.push(goal.to_owned());

        let mut env: BTreeMap<String, String> = engine_config.env.clone();
        env.insert(
            "HARNESS_BUS_ROOT".into(),
            container_config.bus_mount.clone(),
        );
        env.insert("HARNESS_ENGINE".into(), self.id().into());

        let mut mounts = vec![(bus_root.to_owned(), container_config.bus_mount.clone())];
        if let Some(workspace) = workspace {
            mounts.push((workspace.to_owned(), container_config.workdir.clone()));
        }

        ContainerSpec {
            image: engine_config.image.clone(),
            agent_command,
            env,
            mounts,
            workdir: container_config.workdir.clone(),
            network_mode: container_config.network_mode.clone(),
            cpus: container_config.cpus.clone(),
            memory: container_config.memory.clone(),
        }
    }

    /// Parse this engine's `result` payload shape.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the payload does not match the
    /// engine's documented result shape.
    pub fn parse_result(self, payload: &serde_json::Value) -> Result<SessionOutcome> {
        match self {
            Self::Codex => {
                let status = payload
                    .get("status")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| AppError::Protocol("codex result missing 'status'".into()))?;
                let summary = payload
                    .get("summary")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                match status {
                    "ok" => Ok(SessionOutcome {
                        success: true,
                        summary,
                    }),
                    "failed" => Ok(SessionOutcome {
                        success: false,
                        summary,
                    }),
                    other => Err(AppError::Protocol(format!(
                        "codex result status '{other}' is not ok|failed"
                    ))),
                }
            }
            Self::Claude => {
                let is_error = payload
                    .get("is_error")
                    .and_then(serde_json::Value::as_bool)
                    .ok_or_else(|| AppError::Protocol("claude result missing 'is_error'".into()))?;
                let summary = payload
                    .get("result")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Ok(SessionOutcome {
                    success: !is_error,
                    summary,
                })
            }
        }
    }
}
