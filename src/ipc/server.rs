//! Local IPC server for `agent-harness-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the session manager.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "run", "goal": "fix the tests", "mode": "closed", "engine": "codex"}
//! {"command": "cancel", "id": "sess-123"}
//! {"command": "status", "id": "sess-123"}
//! {"command": "steer", "id": "sess-123", "answer": "use approach B"}
//! {"command": "events", "id": "sess-123", "after_seq": 10}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found"}
//! ```

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::task::TaskMode;
use crate::orchestrator::manager::SessionManager;
use crate::{AppError, Result};

/// Inbound IPC request from `agent-harness-ctl`.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Session or task identifier (`cancel`, `status`, `steer`, `events`).
    id: Option<String>,
    /// Goal text (`run`).
    goal: Option<String>,
    /// Execution mode (`run`).
    mode: Option<String>,
    /// Engine identifier (`run`).
    engine: Option<String>,
    /// Steering answer text (`steer`).
    answer: Option<String>,
    /// Replay cursor (`events`).
    after_seq: Option<i64>,
}

/// Outbound IPC response to `agent-harness-ctl`.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn from_result(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    manager: SessionManager,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = manager.state().config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let manager = manager.clone();
                                tokio::spawn(handle_connection(stream, manager));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    manager: SessionManager,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &manager).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the appropriate handler.
async fn dispatch_command(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    let _guard = span.enter();

    match request.command.as_str() {
        "run" => handle_run(request, manager).await,
        "cancel" => handle_cancel(request, manager).await,
        "status" => handle_status(request, manager).await,
        "steer" => handle_steer(request, manager).await,
        "events" => handle_events(request, manager).await,
        other => IpcResponse::error(format!("unknown command: {other}")),
    }
}

fn required<'a>(field: Option<&'a String>, name: &str) -> Result<&'a str> {
    field
        .map(String::as_str)
        .ok_or_else(|| AppError::Ipc(format!("missing field '{name}'")))
}

async fn handle_run(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let result = async {
        let goal = required(request.goal.as_ref(), "goal")?;
        let engine = required(request.engine.as_ref(), "engine")?;
        let mode = match request.mode.as_deref() {
            None => TaskMode::Closed,
            Some(raw) => TaskMode::parse(raw)
                .map_err(|bad| AppError::Ipc(format!("unknown mode '{bad}'")))?,
        };
        let (task, session) = manager.request_session(goal, mode, engine).await?;
        Ok(serde_json::json!({ "task_id": task.id, "session_id": session.id }))
    }
    .await;
    IpcResponse::from_result(result)
}

async fn handle_cancel(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let result = async {
        let id = required(request.id.as_ref(), "id")?;
        manager.cancel_session(id).await?;
        Ok(serde_json::json!({ "cancelled": id }))
    }
    .await;
    IpcResponse::from_result(result)
}

async fn handle_status(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let result = async {
        let id = required(request.id.as_ref(), "id")?;
        let snapshot = manager.get_status(id).await?;
        serde_json::to_value(&snapshot)
            .map_err(|err| AppError::Ipc(format!("snapshot serialization failed: {err}")))
    }
    .await;
    IpcResponse::from_result(result)
}

async fn handle_steer(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let result = async {
        let id = required(request.id.as_ref(), "id")?;
        let answer = required(request.answer.as_ref(), "answer")?;
        manager.submit_steering(id, answer).await?;
        Ok(serde_json::json!({ "steered": id }))
    }
    .await;
    IpcResponse::from_result(result)
}

async fn handle_events(request: &IpcRequest, manager: &SessionManager) -> IpcResponse {
    let result = async {
        let id = required(request.id.as_ref(), "id")?;
        let events = manager
            .list_events(id, request.after_seq.unwrap_or(0))
            .await?;
        serde_json::to_value(&events)
            .map_err(|err| AppError::Ipc(format!("event serialization failed: {err}")))
    }
    .await;
    IpcResponse::from_result(result)
}
