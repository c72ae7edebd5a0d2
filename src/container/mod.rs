//! Container lifecycle abstraction.
//!
//! The [`ContainerRuntime`] trait decouples the session state machine
//! from the concrete container engine. The production implementation
//! shells out to the Docker CLI; tests substitute an in-memory double.
//! Handles are owned exclusively by the runtime — callers hold only the
//! opaque reference and route every operation through their session's
//! single control loop.

pub mod docker;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Opaque host-side reference to a running container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-level container identifier (name).
    pub container_id: String,
    /// Session the container belongs to.
    pub session_id: String,
}

/// Everything the runtime needs to allocate a session's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image to run.
    pub image: String,
    /// Agent command executed inside the container once it is up.
    pub agent_command: Vec<String>,
    /// Extra environment for the agent process.
    pub env: BTreeMap<String, String>,
    /// Host paths mounted into the container as `host:container`.
    pub mounts: Vec<(PathBuf, String)>,
    /// Working directory inside the container.
    pub workdir: String,
    /// Network mode.
    pub network_mode: String,
    /// CPU limit.
    pub cpus: String,
    /// Memory limit.
    pub memory: String,
}

/// Non-blocking container health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Container is up.
    Running,
    /// Container finished with the given exit code.
    Exited(i64),
    /// The runtime lost track of the container (daemon restart, stale
    /// handle). Distinct from `Exited`: triggers reconciliation, not an
    /// immediate failure verdict.
    Unreachable,
}

/// Final process information collected at reap time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the runtime still knows it.
    pub exit_code: Option<i64>,
}

/// Signal classes deliverable to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Graceful stop request.
    Terminate,
    /// Steering interrupt.
    Interrupt,
}

/// Lifecycle operations for one session's container.
///
/// `start` is idempotent per session id under at-least-once retry: an
/// existing healthy container is adopted, never duplicated. `teardown`
/// is idempotent and never fails on "already removed".
pub trait ContainerRuntime: Send + Sync {
    /// Allocate (or adopt) the container for a session and start it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if
    /// allocation fails.
    fn start(
        &self,
        session_id: &str,
        spec: &ContainerSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ContainerHandle>> + Send + '_>>;

    /// Launch the in-container agent (the container-side bus endpoint),
    /// detached from the calling task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if the
    /// exec fails to launch.
    fn exec_agent(
        &self,
        handle: &ContainerHandle,
        spec: &ContainerSpec,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Non-blocking health check.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) only
    /// when the runtime itself cannot be queried; a missing container is
    /// reported as [`ProbeStatus::Unreachable`], not an error.
    fn probe(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeStatus>> + Send + '_>>;

    /// Deliver a signal to the container's init process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if the
    /// runtime rejects the signal for a live container.
    fn signal(
        &self,
        handle: &ContainerHandle,
        kind: SignalKind,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Force-terminate the container. Killing an already-dead container
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) on a
    /// runtime failure other than "no such container".
    fn kill(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Collect final exit information.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) if the
    /// runtime cannot be queried.
    fn reap(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<ExitInfo>> + Send + '_>>;

    /// Remove the container and its resources. Safe to call repeatedly
    /// and on an already-gone container.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`](crate::AppError::Container) on a
    /// runtime failure other than "already removed".
    fn teardown(
        &self,
        handle: &ContainerHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
