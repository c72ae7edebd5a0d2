use std::time::Duration;

use agent_harness::models::message::{BusMessage, MessageKind};
use agent_harness::models::session::SessionState;
use agent_harness::models::task::{TaskMode, TaskStatus};
use serde_json::json;
use serial_test::serial;

use super::test_helpers::{
    agent_channel, assert_gapless, harness, wait_for_response, wait_for_state, FakeRuntime,
};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
#[serial]
async fn successful_session_runs_to_reaped() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (task, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;

    // The agent reports success over the bus.
    let channel = agent_channel(&harness.state, &session);
    let result = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "done" }),
    );
    channel.submit_request(&result).expect("submit result");

    let ack = wait_for_response(&channel, &result.id, WAIT).await;
    assert_eq!(ack.kind, MessageKind::Response);
    assert_eq!(ack.payload["recorded"], true);

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    assert_eq!(finished.exit_summary.as_deref(), Some("done"));

    // The status snapshot carries the summary verbatim.
    let snapshot = harness.manager.get_status(&session.id).await.expect("status");
    assert_eq!(snapshot.task.id, task.id);
    assert_eq!(snapshot.task.status, TaskStatus::Succeeded);
    assert_eq!(
        snapshot.sessions[0].exit_summary.as_deref(),
        Some("done")
    );

    // Teardown ran exactly once.
    assert_eq!(harness.runtime.teardown_count(), 1);

    // Event log: strictly increasing, no gaps, and the expected walk.
    let events = harness
        .manager
        .list_events(&session.id, 0)
        .await
        .expect("events");
    assert_gapless(&events);
    let transitions: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == agent_harness::models::event::EventKind::StateChanged)
        .map(|e| e.detail.as_str())
        .collect();
    assert!(transitions[0].starts_with("created -> starting"));
    assert!(transitions.iter().any(|d| d.starts_with("starting -> running")));
    assert!(transitions.iter().any(|d| d.starts_with("running -> succeeded")));
    assert!(transitions.last().is_some_and(|d| d.starts_with("succeeded -> reaped")));
}

#[tokio::test]
#[serial]
async fn failure_result_marks_the_session_failed() {
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
        json!({ "status": "failed", "summary": "tests still red" }),
    );
    channel.submit_request(&result).expect("submit result");

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    assert_eq!(finished.exit_summary.as_deref(), Some("tests still red"));

    let snapshot = harness.manager.get_status(&session.id).await.expect("status");
    assert_eq!(snapshot.task.status, TaskStatus::Failed);
}

#[tokio::test]
#[serial]
async fn container_death_without_result_fails_the_session() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;

    harness.runtime.set_probe(
        &FakeRuntime::container_name(&session.id),
        agent_harness::container::ProbeStatus::Exited(2),
    );

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    assert_eq!(
        finished.exit_summary.as_deref(),
        Some("container exited with code 2")
    );
    assert_eq!(harness.runtime.teardown_count(), 1);
}

#[tokio::test]
#[serial]
async fn malformed_bus_message_is_answered_and_the_session_continues() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;

    let channel = agent_channel(&harness.state, &session);
    std::fs::write(channel.paths().inbox().join("000001-broken.json"), "{{{")
        .expect("write junk");

    let error = wait_for_response(&channel, "broken", WAIT).await;
    assert_eq!(error.kind, MessageKind::Error);

    // Still running: a protocol error is not a session failure.
    let session_now = harness
        .state
        .sessions()
        .get_by_id(&session.id)
        .await
        .expect("get");
    assert_eq!(session_now.state, SessionState::Running);

    let protocol_errors = harness
        .state
        .events()
        .count_kind(&session.id, agent_harness::models::event::EventKind::ProtocolError)
        .await
        .expect("count");
    assert_eq!(protocol_errors, 1);

    // Wind the session down.
    let result = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "recovered" }),
    );
    channel.submit_request(&result).expect("submit result");
    wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
}
