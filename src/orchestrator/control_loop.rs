//! Per-session control loop.
//!
//! Drives one session through `Created → Starting → Running → terminal
//! → Reaped`, resuming from whatever state the store records — the same
//! entry point serves fresh sessions and crash recovery. Every
//! suspension is bounded: container startup by the startup deadline,
//! bus silence by the idle deadline, cancellation by the grace period.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, info_span, warn, Instrument};

use crate::bus::{BusChannel, BusWatcher, Inbound};
use crate::container::{ContainerHandle, ContainerSpec, ProbeStatus, SignalKind};
use crate::engine::Engine;
use crate::models::event::EventKind;
use crate::models::message::MessageKind;
use crate::models::session::{Session, SessionState};
use crate::models::task::TaskStatus;
use crate::{AppError, Result};

use super::{artifacts, dispatch, HarnessState};

/// Run a session to completion (or until daemon shutdown).
pub async fn run(state: Arc<HarnessState>, session_id: String) {
    let span = info_span!("session_loop", session_id);
    if let Err(err) = drive(&state, &session_id).instrument(span).await {
        warn!(session_id, %err, "session loop aborted");
    }
}

async fn drive(state: &Arc<HarnessState>, session_id: &str) -> Result<()> {
    loop {
        if state.shutdown.is_cancelled() {
            return Ok(());
        }
        let session = state.sessions().get_by_id(session_id).await?;
        match session.state {
            SessionState::Created => {
                state
                    .transition_logged(session_id, SessionState::Starting, None)
                    .await?;
            }
            SessionState::Starting => start_phase(state, session_id).await?,
            SessionState::Running => watch_phase(state, session_id).await?,
            SessionState::Reaped => return Ok(()),
            _ => {
                finalize(state, session_id).await?;
                return Ok(());
            }
        }
    }
}

fn handle_of(session: &Session) -> Option<ContainerHandle> {
    session.container_id.as_ref().map(|id| ContainerHandle {
        container_id: id.clone(),
        session_id: session.id.clone(),
    })
}

async fn build_spec(state: &Arc<HarnessState>, session: &Session) -> Result<ContainerSpec> {
    let engine = Engine::from_id(&session.engine)?;
    let engine_config = state.config.engine(&session.engine)?;
    let task = state.tasks().get_by_id(&session.task_id).await?;
    let bus_root = PathBuf::from(&session.bus_root);
    Ok(engine.container_spec(
        engine_config,
        &state.config.container,
        &task.goal,
        &bus_root,
        None,
    ))
}

/// Bring the container up and attach the agent, or fail the session.
async fn start_phase(state: &Arc<HarnessState>, session_id: &str) -> Result<()> {
    let session = state.sessions().get_by_id(session_id).await?;
    let spec = build_spec(state, &session).await?;

    // The bus tree must exist before the container mounts it.
    let channel = BusChannel::open(
        session_id,
        PathBuf::from(&session.bus_root),
        state.processed(),
    )?;

    let deadline = Instant::now() + Duration::from_secs(state.config.timeouts.startup_seconds);
    let mut backoff = Duration::from_millis(state.config.retry.start_backoff_ms);

    for attempt in 1..=state.config.retry.start_attempts {
        if state.sessions().get_by_id(session_id).await?.cancel_requested {
            cancel_now(state, &channel, session_id).await?;
            return Ok(());
        }
        if Instant::now() >= deadline {
            break;
        }

        match state.runtime.start(session_id, &spec).await {
            Ok(handle) => {
                state
                    .sessions()
                    .set_container(session_id, &handle.container_id)
                    .await?;
                state
                    .record_event(
                        session_id,
                        EventKind::Container,
                        &format!("container {} started (attempt {attempt})", handle.container_id),
                    )
                    .await?;

                if await_running(state, &handle, deadline).await? {
                    state.runtime.exec_agent(&handle, &spec).await?;
                    state
                        .record_event(session_id, EventKind::Container, "agent attached to bus")
                        .await?;
                    state
                        .transition_logged(session_id, SessionState::Running, None)
                        .await?;
                    state
                        .tasks()
                        .set_status(&session.task_id, TaskStatus::Running)
                        .await?;
                    return Ok(());
                }
                // Never became healthy inside the budget; count the
                // attempt and retry from a clean slate.
                let _ = state.runtime.teardown(&handle).await;
            }
            Err(err) => {
                state
                    .record_event(
                        session_id,
                        EventKind::Container,
                        &format!("start attempt {attempt} failed: {err}"),
                    )
                    .await?;
            }
        }

        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }

    let detail = format!(
        "StartupFailure: container did not reach running within {}s ({} attempts)",
        state.config.timeouts.startup_seconds, state.config.retry.start_attempts
    );
    state
        .transition_logged(session_id, SessionState::Failed, Some(&detail))
        .await?;
    Ok(())
}

/// Poll the container until it reports `Running` or the deadline passes.
async fn await_running(
    state: &Arc<HarnessState>,
    handle: &ContainerHandle,
    deadline: Instant,
) -> Result<bool> {
    loop {
        match state.runtime.probe(handle).await? {
            ProbeStatus::Running => return Ok(true),
            ProbeStatus::Exited(_) => return Ok(false),
            // The runtime may not know a just-created container yet;
            // keep polling until the deadline decides.
            ProbeStatus::Unreachable => {}
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(state.config.poll_interval()).await;
    }
}

/// Watch the bus and the container until the session settles.
async fn watch_phase(state: &Arc<HarnessState>, session_id: &str) -> Result<()> {
    let session = state.sessions().get_by_id(session_id).await?;
    let channel = BusChannel::open(
        session_id,
        PathBuf::from(&session.bus_root),
        state.processed(),
    )?;
    let mut watcher = BusWatcher::watch(&channel.paths().inbox());

    let idle_budget = Duration::from_secs(state.config.timeouts.idle_seconds);
    let mut last_activity = Instant::now();

    loop {
        if state.shutdown.is_cancelled() {
            // Leave the session running; recovery re-attaches next boot.
            return Ok(());
        }
        watcher.wait(state.config.poll_interval()).await;

        let session = state.sessions().get_by_id(session_id).await?;
        if session.state != SessionState::Running {
            return Ok(());
        }
        if session.cancel_requested {
            cancel_now(state, &channel, session_id).await?;
            return Ok(());
        }

        match process_inbox(state, &channel, &session, &mut last_activity).await? {
            BatchVerdict::Continue => {}
            BatchVerdict::Settled => return Ok(()),
            BatchVerdict::CancelRequested => {
                cancel_now(state, &channel, session_id).await?;
                return Ok(());
            }
        }

        if let Some(handle) = handle_of(&session) {
            match state.runtime.probe(&handle).await? {
                ProbeStatus::Running => {}
                ProbeStatus::Exited(code) => {
                    let detail = if code == 0 {
                        "container exited without result".to_owned()
                    } else {
                        format!("container exited with code {code}")
                    };
                    state
                        .record_event(session_id, EventKind::Container, &detail)
                        .await?;
                    settle(state, session_id, SessionState::Failed, &detail).await?;
                    return Ok(());
                }
                ProbeStatus::Unreachable => {
                    if !reconcile(state, &handle).await? {
                        let detail = "ContainerUnreachable: runtime lost the container".to_owned();
                        state
                            .record_event(session_id, EventKind::Container, &detail)
                            .await?;
                        settle(state, session_id, SessionState::Failed, &detail).await?;
                        return Ok(());
                    }
                }
            }
        }

        if last_activity.elapsed() >= idle_budget {
            let detail = format!(
                "Timeout: no progress within {}s",
                state.config.timeouts.idle_seconds
            );
            settle(state, session_id, SessionState::TimedOut, &detail).await?;
            return Ok(());
        }
    }
}

/// What a full inbox batch decided.
enum BatchVerdict {
    /// Nothing settled; keep watching.
    Continue,
    /// An outcome was recorded mid-batch.
    Settled,
    /// A suspension observed the durable cancel flag.
    CancelRequested,
}

/// Drain the inbox once and dispatch every entry in write order.
async fn process_inbox(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session: &Session,
    last_activity: &mut Instant,
) -> Result<BatchVerdict> {
    let session_id = session.id.as_str();
    let mut settled = false;
    for inbound in channel.drain_inbox().await? {
        match inbound {
            Inbound::Request(message) => {
                // After the outcome is recorded, only duplicate results
                // get a full dispatch (for the idempotence / conflict
                // verdict); anything else is too late.
                if settled && message.kind != MessageKind::Result {
                    dispatch::reject_logged(
                        state,
                        channel,
                        session_id,
                        &message.id,
                        "session already settled",
                    )
                    .await?;
                    continue;
                }
                *last_activity = Instant::now();
                state
                    .record_event(
                        session_id,
                        EventKind::MessageReceived,
                        &format!("{} {}", message.kind.as_str(), message.id),
                    )
                    .await?;
                match dispatch::handle(state, channel, session, &message).await? {
                    dispatch::Flow::Continue => {}
                    dispatch::Flow::CancelRequested => return Ok(BatchVerdict::CancelRequested),
                    dispatch::Flow::Settled => settled = true,
                }
                // A completed suspension (wait, ask) is progress too.
                *last_activity = Instant::now();
            }
            Inbound::Replayed(message) => {
                info!(message_id = message.id, "request replayed from ledger");
            }
            Inbound::Malformed {
                fallback_id,
                detail,
            } => {
                if state.processed().lookup(&fallback_id).await?.is_none() {
                    dispatch::reject_logged(state, channel, session_id, &fallback_id, &detail)
                        .await?;
                }
            }
        }
    }
    if settled {
        Ok(BatchVerdict::Settled)
    } else {
        Ok(BatchVerdict::Continue)
    }
}

/// Record a terminal outcome, tolerating an agreeing duplicate.
async fn settle(
    state: &Arc<HarnessState>,
    session_id: &str,
    next: SessionState,
    detail: &str,
) -> Result<()> {
    match state.transition_logged(session_id, next, Some(detail)).await {
        Ok(_) => Ok(()),
        Err(AppError::Conflict(msg)) => {
            // A contradictory outcome is logged, never silently resolved.
            state
                .record_event(session_id, EventKind::ProtocolError, &msg)
                .await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Re-probe an unreachable container with backoff.
///
/// Returns true when the container answered again.
async fn reconcile(state: &Arc<HarnessState>, handle: &ContainerHandle) -> Result<bool> {
    let mut backoff = Duration::from_millis(state.config.retry.start_backoff_ms);
    for _ in 0..state.config.retry.probe_attempts {
        tokio::time::sleep(backoff).await;
        backoff *= 2;
        match state.runtime.probe(handle).await? {
            ProbeStatus::Unreachable => {}
            _ => return Ok(true),
        }
    }
    Ok(false)
}

/// Cooperative cancellation with a deadline: control message, TERM,
/// grace period, then an unconditional kill. Teardown follows in
/// `finalize` regardless of how the container went down.
async fn cancel_now(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session_id: &str,
) -> Result<()> {
    let session = state.sessions().get_by_id(session_id).await?;
    info!(session_id, "cancelling session");

    // A cancelled session leaves no steering question dangling.
    while let Some(ask) = state.asks().oldest_pending(session_id).await? {
        state.asks().expire(&ask.id).await?;
        state
            .record_event_best_effort(session_id, EventKind::AskExpired, &format!("ask {}", ask.id))
            .await;
    }

    if let Ok(path) = channel.send_control(MessageKind::Cancel, serde_json::json!({})) {
        state
            .record_event_best_effort(
                session_id,
                EventKind::MessageSent,
                &format!("cancel control {}", path.display()),
            )
            .await;
    }

    if let Some(handle) = handle_of(&session) {
        if let Err(err) = state.runtime.signal(&handle, SignalKind::Terminate).await {
            warn!(session_id, %err, "terminate signal failed");
        }

        let grace = Duration::from_secs(state.config.timeouts.cancel_grace_seconds);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !matches!(state.runtime.probe(&handle).await, Ok(ProbeStatus::Running)) {
                break;
            }
            tokio::time::sleep(state.config.poll_interval()).await;
        }

        if let Err(err) = state.runtime.kill(&handle).await {
            warn!(session_id, %err, "kill after grace period failed");
        }
    }

    settle(
        state,
        session_id,
        SessionState::Cancelled,
        "Cancelled: external request",
    )
    .await
}

/// Flush artifacts, tear the container down, reap, and mark the task.
async fn finalize(state: &Arc<HarnessState>, session_id: &str) -> Result<()> {
    let session = state.sessions().get_by_id(session_id).await?;

    let run_dir = state
        .config
        .session_run_dir(&session.task_id, &session.id);
    if let Err(err) = artifacts::flush_exit_summary(&run_dir, &session) {
        warn!(session_id, %err, "failed to flush exit summary");
    }

    if let Some(handle) = handle_of(&session) {
        match state.runtime.reap(&handle).await {
            Ok(exit) => {
                state
                    .record_event_best_effort(
                        session_id,
                        EventKind::Container,
                        &format!("reaped (exit code {:?})", exit.exit_code),
                    )
                    .await;
            }
            Err(err) => warn!(session_id, %err, "reap failed"),
        }

        // Teardown must complete before the session is marked reaped;
        // on failure the session stays terminal and recovery retries.
        state.runtime.teardown(&handle).await?;
        state
            .record_event_best_effort(session_id, EventKind::Container, "container removed")
            .await;
    }

    state
        .transition_logged(session_id, SessionState::Reaped, None)
        .await?;

    let task_status = match session.state {
        SessionState::Succeeded => TaskStatus::Succeeded,
        SessionState::Cancelled => TaskStatus::Cancelled,
        _ => TaskStatus::Failed,
    };
    state
        .tasks()
        .set_status(&session.task_id, task_status)
        .await?;
    info!(
        session_id,
        outcome = session.state.as_str(),
        "session reaped"
    );
    Ok(())
}
