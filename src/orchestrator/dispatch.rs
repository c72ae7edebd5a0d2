//! Command dispatch for inbound bus requests.
//!
//! Every request is answered — with a response once handled, or with an
//! error carrying the original correlation id when malformed or
//! rejected. `wait` and `ask` suspend the session's forward progress
//! with bounded deadlines; both keep observing the durable cancel flag
//! so cancellation cuts through a suspension.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use crate::bus::BusChannel;
use crate::engine::Engine;
use crate::models::event::EventKind;
use crate::models::message::{BusMessage, MessageKind};
use crate::models::session::{Session, SessionState};
use crate::models::task::TaskMode;
use crate::persistence::ask_repo::{Ask, AskStatus};
use crate::Result;

use super::manager::SessionManager;
use super::HarnessState;

/// What the control loop should do after a dispatch.
#[derive(Debug)]
pub enum Flow {
    /// Keep watching the bus.
    Continue,
    /// The durable cancel flag was observed mid-suspension.
    CancelRequested,
    /// A terminal outcome has been recorded; move on to cleanup.
    Settled,
}

/// Dispatch one well-formed request.
///
/// # Errors
///
/// Returns an error only for infrastructure failures (store or bus I/O);
/// protocol-level problems are answered on the bus and logged as events.
pub async fn handle(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session: &Session,
    message: &BusMessage,
) -> Result<Flow> {
    match message.kind {
        MessageKind::Spawn => handle_spawn(state, channel, session, message).await,
        MessageKind::Wait => handle_wait(state, channel, session, message).await,
        MessageKind::Ask => handle_ask(state, channel, session, message).await,
        MessageKind::Result => handle_result(state, channel, session, message).await,
        MessageKind::Heartbeat => {
            respond_logged(state, channel, &session.id, &message.id, json!({})).await?;
            Ok(Flow::Continue)
        }
        _ => {
            // drain_inbox filters non-requests; this is a defect guard.
            reject_logged(state, channel, &session.id, &message.id, "not a request").await?;
            Ok(Flow::Continue)
        }
    }
}

/// Answer a rejected or malformed message and log the protocol error.
///
/// # Errors
///
/// Returns an error if the store or bus write fails.
pub async fn reject_logged(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session_id: &str,
    request_id: &str,
    detail: &str,
) -> Result<()> {
    state
        .record_event(session_id, EventKind::ProtocolError, detail)
        .await?;
    channel.respond_error(request_id, detail).await?;
    state
        .record_event(session_id, EventKind::MessageSent, &format!("error {request_id}"))
        .await?;
    Ok(())
}

async fn respond_logged(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session_id: &str,
    request_id: &str,
    payload: serde_json::Value,
) -> Result<()> {
    channel.respond(request_id, payload).await?;
    state
        .record_event(
            session_id,
            EventKind::MessageSent,
            &format!("response {request_id}"),
        )
        .await?;
    Ok(())
}

/// `spawn`: create a nested task/session pair and answer with its ids
/// once accepted — not once finished.
async fn handle_spawn(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session: &Session,
    message: &BusMessage,
) -> Result<Flow> {
    let parent = state.tasks().get_by_id(&session.task_id).await?;

    let goal = message
        .payload
        .get("goal")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if goal.is_empty() {
        reject_logged(state, channel, &session.id, &message.id, "spawn without goal").await?;
        return Ok(Flow::Continue);
    }

    let mode = match message.payload.get("mode").and_then(serde_json::Value::as_str) {
        Some(raw) => match TaskMode::parse(raw) {
            Ok(mode) => mode,
            Err(bad) => {
                reject_logged(
                    state,
                    channel,
                    &session.id,
                    &message.id,
                    &format!("unknown spawn mode '{bad}'"),
                )
                .await?;
                return Ok(Flow::Continue);
            }
        },
        None => parent.mode,
    };
    let engine_id = message
        .payload
        .get("engine")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&parent.engine);

    let manager = SessionManager::new(Arc::clone(state));
    match manager
        .request_child_session(&parent, goal, mode, engine_id)
        .await
    {
        Ok((task, child)) => {
            info!(
                session_id = session.id,
                child_session = child.id,
                "sub-session spawned"
            );
            respond_logged(
                state,
                channel,
                &session.id,
                &message.id,
                json!({ "task_id": task.id, "session_id": child.id }),
            )
            .await?;
        }
        Err(err) => {
            warn!(session_id = session.id, %err, "spawn rejected");
            reject_logged(state, channel, &session.id, &message.id, &err.to_string()).await?;
        }
    }
    Ok(Flow::Continue)
}

/// `wait`: suspend until the referenced session reaches a terminal
/// state, then answer with its outcome.
async fn handle_wait(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session: &Session,
    message: &BusMessage,
) -> Result<Flow> {
    let Some(target_id) = message
        .payload
        .get("session_id")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
    else {
        reject_logged(state, channel, &session.id, &message.id, "wait without session_id").await?;
        return Ok(Flow::Continue);
    };

    if state.sessions().get_by_id(&target_id).await.is_err() {
        reject_logged(
            state,
            channel,
            &session.id,
            &message.id,
            &format!("wait target {target_id} not found"),
        )
        .await?;
        return Ok(Flow::Continue);
    }

    let deadline = Instant::now() + Duration::from_secs(state.config.timeouts.wait_seconds);
    loop {
        let own = state.sessions().get_by_id(&session.id).await?;
        if own.cancel_requested {
            return Ok(Flow::CancelRequested);
        }

        let target = state.sessions().get_by_id(&target_id).await?;
        if target.state.is_final() {
            respond_logged(
                state,
                channel,
                &session.id,
                &message.id,
                json!({
                    "session_id": target.id,
                    "state": target.state.as_str(),
                    "summary": target.exit_summary,
                }),
            )
            .await?;
            return Ok(Flow::Continue);
        }

        if Instant::now() >= deadline {
            reject_logged(
                state,
                channel,
                &session.id,
                &message.id,
                &format!("wait deadline exceeded for {target_id}"),
            )
            .await?;
            let detail = format!(
                "Timeout: wait on {target_id} exceeded {}s",
                state.config.timeouts.wait_seconds
            );
            state
                .transition_logged(&session.id, SessionState::TimedOut, Some(&detail))
                .await?;
            return Ok(Flow::Settled);
        }

        tokio::time::sleep(state.config.poll_interval()).await;
    }
}

/// `ask`: raise a durable steering question and suspend until the
/// operator answers or the idle deadline expires the question.
async fn handle_ask(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session: &Session,
    message: &BusMessage,
) -> Result<Flow> {
    let text = message
        .payload
        .get("text")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if text.is_empty() {
        reject_logged(state, channel, &session.id, &message.id, "ask without text").await?;
        return Ok(Flow::Continue);
    }

    let ask = state
        .asks()
        .create(&Ask::new(
            session.id.clone(),
            message.id.clone(),
            text.to_owned(),
        ))
        .await?;
    state
        .record_event(
            &session.id,
            EventKind::AskRaised,
            &format!("ask {}: {text}", ask.id),
        )
        .await?;

    let deadline = Instant::now() + Duration::from_secs(state.config.timeouts.idle_seconds);
    loop {
        let own = state.sessions().get_by_id(&session.id).await?;
        if own.cancel_requested {
            return Ok(Flow::CancelRequested);
        }

        let current = state.asks().get_by_id(&ask.id).await?;
        match current.status {
            AskStatus::Answered => {
                respond_logged(
                    state,
                    channel,
                    &session.id,
                    &message.id,
                    json!({ "answer": current.answer }),
                )
                .await?;
                return Ok(Flow::Continue);
            }
            AskStatus::Expired => break,
            AskStatus::Pending => {}
        }

        if Instant::now() >= deadline {
            state.asks().expire(&ask.id).await?;
            break;
        }
        tokio::time::sleep(state.config.poll_interval()).await;
    }

    // Expired: the question is never left dangling.
    state
        .record_event(&session.id, EventKind::AskExpired, &format!("ask {}", ask.id))
        .await?;
    channel
        .respond_error(&message.id, "steering request expired")
        .await?;
    state
        .record_event(
            &session.id,
            EventKind::MessageSent,
            &format!("error {}", message.id),
        )
        .await?;
    let detail = format!(
        "Timeout: steering request expired after {}s",
        state.config.timeouts.idle_seconds
    );
    state
        .transition_logged(&session.id, SessionState::TimedOut, Some(&detail))
        .await?;
    Ok(Flow::Settled)
}

/// `result`: parse the engine payload and settle the session outcome.
async fn handle_result(
    state: &Arc<HarnessState>,
    channel: &BusChannel,
    session: &Session,
    message: &BusMessage,
) -> Result<Flow> {
    let engine = match Engine::from_id(&session.engine) {
        Ok(engine) => engine,
        Err(err) => {
            reject_logged(state, channel, &session.id, &message.id, &err.to_string()).await?;
            return Ok(Flow::Continue);
        }
    };

    let outcome = match engine.parse_result(&message.payload) {
        Ok(outcome) => outcome,
        Err(err) => {
            reject_logged(state, channel, &session.id, &message.id, &err.to_string()).await?;
            return Ok(Flow::Continue);
        }
    };

    let next = if outcome.success {
        SessionState::Succeeded
    } else {
        SessionState::Failed
    };

    // Settle before acknowledging: a duplicate that agrees with the
    // recorded outcome replays idempotently; a contradictory one is a
    // conflict the sender must hear about.
    match state
        .transition_logged(&session.id, next, Some(&outcome.summary))
        .await
    {
        Ok(_) => {
            respond_logged(
                state,
                channel,
                &session.id,
                &message.id,
                json!({ "recorded": true }),
            )
            .await?;
            Ok(Flow::Settled)
        }
        Err(crate::AppError::Conflict(msg)) => {
            reject_logged(state, channel, &session.id, &message.id, &msg).await?;
            Ok(Flow::Settled)
        }
        Err(err) => Err(err),
    }
}
