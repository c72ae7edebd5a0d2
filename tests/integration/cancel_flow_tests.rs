use std::time::Duration;

use agent_harness::bus::codec;
use agent_harness::models::message::{BusMessage, MessageKind};
use agent_harness::models::session::SessionState;
use agent_harness::models::task::{TaskMode, TaskStatus};
use serde_json::json;
use serial_test::serial;

use super::test_helpers::{agent_channel, harness, wait_for_state, FakeRuntime};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
#[serial]
async fn cancelling_a_running_session_signals_then_kills_then_tears_down() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;
    harness
        .manager
        .cancel_session(&session.id)
        .await
        .expect("cancel");

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    assert_eq!(
        finished.exit_summary.as_deref(),
        Some("Cancelled: external request")
    );

    // Cooperative shutdown ran the whole ladder: control message,
    // signal, kill, teardown.
    let channel = agent_channel(&harness.state, &session);
    let control = codec::scan(&channel.paths().control()).expect("scan control");
    assert!(control
        .iter()
        .any(|f| codec::read_message(&f.path).is_ok_and(|m| m.kind == MessageKind::Cancel)));
    assert!(harness.runtime.signals.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    assert_eq!(harness.runtime.kill_count(), 1);
    assert_eq!(harness.runtime.teardown_count(), 1);

    let snapshot = harness.manager.get_status(&session.id).await.expect("status");
    assert_eq!(snapshot.task.status, TaskStatus::Cancelled);
}

#[tokio::test]
#[serial]
async fn cancellation_cuts_through_a_pending_ask() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Interactive, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;

    // The agent is suspended on a steering question...
    let channel = agent_channel(&harness.state, &session);
    let ask = BusMessage::request(MessageKind::Ask, json!({ "text": "still there?" }));
    channel.submit_request(&ask).expect("submit ask");

    let deadline = std::time::Instant::now() + WAIT;
    loop {
        if harness
            .state
            .asks()
            .oldest_pending(&session.id)
            .await
            .expect("query")
            .is_some()
        {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "ask never surfaced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // ...when the operator cancels instead of answering.
    harness
        .manager
        .cancel_session(&session.id)
        .await
        .expect("cancel");

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    assert_eq!(
        finished.exit_summary.as_deref(),
        Some("Cancelled: external request")
    );
    assert_eq!(harness.runtime.teardown_count(), 1);
}

#[tokio::test]
#[serial]
async fn cancelling_a_finished_session_is_a_quiet_no_op() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;
    let channel = agent_channel(&harness.state, &session);
    let result = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "done" }),
    );
    channel.submit_request(&result).expect("submit result");
    wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;

    harness
        .manager
        .cancel_session(&session.id)
        .await
        .expect("cancel after reap is fine");

    let snapshot = harness.manager.get_status(&session.id).await.expect("status");
    assert_eq!(snapshot.sessions[0].exit_summary.as_deref(), Some("done"));
    assert_eq!(snapshot.task.status, TaskStatus::Succeeded);
}
