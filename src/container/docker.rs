//! Docker CLI container runtime.
//!
//! Containers are created with a `sleep infinity` init process, a
//! deterministic per-session name, resource limits, and the workspace
//! and bus mounts; the agent is launched afterwards with a detached
//! exec. Existing containers are adopted by name, which makes `start`
//! idempotent under retry.

use std::future::Future;
use std::pin::Pin;
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::{AppError, Result};

use super::{ContainerHandle, ContainerRuntime, ContainerSpec, ExitInfo, ProbeStatus, SignalKind};

/// Container name prefix; the session id completes it.
const NAME_PREFIX: &str = "harness-session-";

/// `ContainerRuntime` backed by the local Docker daemon via its CLI.
pub struct DockerRuntime {
    config: ContainerConfig,
}

impl DockerRuntime {
    /// Create a runtime using the given container settings.
    #[must_use]
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    fn container_name(session_id: &str) -> String {
        format!("{NAME_PREFIX}{session_id}")
    }

    async fn run(&self, args: &[String]) -> Result<Output> {
        debug!(binary = self.config.binary, ?args, "container runtime call");
        Command::new(&self.config.binary)
            .args(args)
            .output()
            .await
            .map_err(|err| AppError::Container(format!("cannot run {}: {err}", self.config.binary)))
    }

    async fn run_ok(&self, args: &[String]) -> Result<()> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AppError::Container(format!(
                "{} {} failed: {}",
                self.config.binary,
                args.first().map_or("", String::as_str),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        let args: Vec<String> = [
            "ps",
            "-a",
            "--filter",
            &format!("name=^{name}$"),
            "--format",
            "{{.ID}}",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        let output = self.run(&args).await?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    async fn create(&self, name: &str, session_id: &str, spec: &ContainerSpec) -> Result<()> {
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            name.into(),
            "--label".into(),
            format!("harness.session_id={session_id}"),
            "--workdir".into(),
            spec.workdir.clone(),
            "--network".into(),
            spec.network_mode.clone(),
            "--cpus".into(),
            spec.cpus.clone(),
            "--memory".into(),
            spec.memory.clone(),
        ];
        for (host, target) in &spec.mounts {
            args.push("-v".into());
            args.push(format!("{}:{target}", host.display()));
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args.extend(["sleep".into(), "infinity".into()]);
        self.run_ok(&args).await
    }
}

impl ContainerRuntime for DockerRuntime {
    fn start(
        &self,
        session_id: &str,
        spec: &ContainerSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ContainerHandle>> + Send + '_>> {
        let session_id = session_id.to_owned();
        let spec = spec.clone();
        Box::pin(async move {
            let name = Self::container_name(&session_id);
            if self.container_exists(&name).await? {
                info!(container = name, "adopting existing container");
            } else {
                self.create(&name, &session_id, &spec).await?;
            }
            self.run_ok(&["start".into(), name.clone()]).await?;
            Ok(ContainerHandle {
                container_id: name,
                session_id,
            })
        })
    }

    fn exec_agent(
        &self,
        handle: &ContainerHandle,
        spec: &ContainerSpec,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = handle.container_id.clone();
        let workdir = spec.workdir.clone();
        let command = spec.agent_command.clone();
        Box::pin(async move {
            let mut args: Vec<String> = vec!["exec".into(), "-d".into(), "-w".into(), workdir];
            args.push(name);
            args.extend(command);
            self.run_ok(&args).await
        })
    }

    fn probe(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeStatus>> + Send + '_>> {
        let name = handle.container_id.clone();
        Box::pin(async move {
            let args: Vec<String> = [
                "inspect",
                "--format",
                "{{.State.Status}} {{.State.ExitCode}}",
                &name,
            ]
            .iter()
            .map(ToString::to_string)
            .collect();
            let output = self.run(&args).await?;
            if !output.status.success() {
                // Inspect fails when the daemon forgot the container.
                return Ok(ProbeStatus::Unreachable);
            }
            let text = String::from_utf8_lossy(&output.stdout);
            let mut parts = text.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("running"), _) => Ok(ProbeStatus::Running),
                (Some("exited" | "dead"), Some(code)) => {
                    Ok(ProbeStatus::Exited(code.parse().unwrap_or(-1)))
                }
                (Some(status), _) => {
                    debug!(container = name, status, "intermediate container status");
                    Ok(ProbeStatus::Running)
                }
                _ => Ok(ProbeStatus::Unreachable),
            }
        })
    }

    fn signal(
        &self,
        handle: &ContainerHandle,
        kind: SignalKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = handle.container_id.clone();
        let signal = match kind {
            SignalKind::Terminate => "TERM",
            SignalKind::Interrupt => "INT",
        };
        Box::pin(async move {
            self.run_ok(&[
                "kill".into(),
                format!("--signal={signal}"),
                name,
            ])
            .await
        })
    }

    fn kill(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = handle.container_id.clone();
        Box::pin(async move {
            let output = self.run(&["kill".into(), name.clone()]).await?;
            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Killing a container that already stopped is a no-op.
            if stderr.contains("is not running") || stderr.contains("No such container") {
                debug!(container = name, "kill on stopped container ignored");
                return Ok(());
            }
            Err(AppError::Container(format!("kill failed: {}", stderr.trim())))
        })
    }

    fn reap(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<ExitInfo>> + Send + '_>> {
        let name = handle.container_id.clone();
        Box::pin(async move {
            let args: Vec<String> = ["inspect", "--format", "{{.State.ExitCode}}", &name]
                .iter()
                .map(ToString::to_string)
                .collect();
            let output = self.run(&args).await?;
            if !output.status.success() {
                return Ok(ExitInfo { exit_code: None });
            }
            let code = String::from_utf8_lossy(&output.stdout).trim().parse().ok();
            Ok(ExitInfo { exit_code: code })
        })
    }

    fn teardown(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = handle.container_id.clone();
        Box::pin(async move {
            let output = self
                .run(&["rm".into(), "-f".into(), "--volumes".into(), name.clone()])
                .await?;
            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                debug!(container = name, "teardown on removed container ignored");
                return Ok(());
            }
            warn!(container = name, stderr = %stderr.trim(), "teardown failed");
            Err(AppError::Container(format!(
                "teardown failed: {}",
                stderr.trim()
            )))
        })
    }
}
