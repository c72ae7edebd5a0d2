use std::time::Duration;

use agent_harness::bus::codec;
use agent_harness::models::event::EventKind;
use agent_harness::models::message::{BusMessage, MessageKind};
use agent_harness::models::session::SessionState;
use agent_harness::models::task::TaskMode;
use serde_json::json;
use serial_test::serial;

use agent_harness::container::ProbeStatus;

use super::test_helpers::{
    agent_channel, harness, wait_for_container, wait_for_response, wait_for_state, FakeBehavior,
    FakeRuntime,
};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
#[serial]
async fn redelivered_requests_produce_one_event_and_one_response() {
    let harness = harness(FakeRuntime::healthy()).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    wait_for_state(&harness.state, &session.id, SessionState::Running, WAIT).await;

    let channel = agent_channel(&harness.state, &session);
    let heartbeat = BusMessage::request(MessageKind::Heartbeat, json!({}));
    let heartbeat_json = serde_json::to_string_pretty(&heartbeat).expect("serialize");
    channel.submit_request(&heartbeat).expect("submit");
    wait_for_response(&channel, &heartbeat.id, WAIT).await;

    // Redeliver the identical message, as a crashed writer would.
    codec::write_raw(&channel.paths().inbox(), &heartbeat.id, &heartbeat_json)
        .expect("redeliver");

    // Give the loop a few ticks to notice and archive the duplicate.
    let deadline = std::time::Instant::now() + WAIT;
    while !codec::scan(&channel.paths().inbox())
        .expect("scan")
        .is_empty()
    {
        assert!(std::time::Instant::now() < deadline, "duplicate never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Exactly one received event and one response for the id.
    let events = harness
        .manager
        .list_events(&session.id, 0)
        .await
        .expect("events");
    let received = events
        .iter()
        .filter(|e| e.kind == EventKind::MessageReceived && e.detail.contains(&heartbeat.id))
        .count();
    assert_eq!(received, 1, "duplicate delivery must not re-dispatch");

    let responses = codec::scan(&channel.paths().outbox())
        .expect("scan outbox")
        .into_iter()
        .filter(|f| f.file_id == heartbeat.id)
        .count();
    assert_eq!(responses, 1, "duplicate delivery must not re-respond");

    // Finish the session cleanly.
    let result = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "done" }),
    );
    channel.submit_request(&result).expect("submit result");
    wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
}

#[tokio::test]
#[serial]
async fn duplicate_result_that_agrees_is_acknowledged_idempotently() {
    // Hold the container short of Running so both results are on the bus
    // before the first drain: one batch, write order.
    let harness = harness(FakeRuntime::with_behavior(FakeBehavior::NeverReady)).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    let container = wait_for_container(&harness.state, &session.id, WAIT).await;
    let channel = agent_channel(&harness.state, &session);
    let first = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "done" }),
    );
    let second = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "done" }),
    );
    channel.submit_request(&first).expect("submit first");
    channel.submit_request(&second).expect("submit second");
    harness.runtime.set_probe(&container, ProbeStatus::Running);

    // Both results agree; the duplicate replays against the recorded
    // outcome and gets its own acknowledgement.
    let first_ack = wait_for_response(&channel, &first.id, WAIT).await;
    assert_eq!(first_ack.kind, MessageKind::Response);
    let second_ack = wait_for_response(&channel, &second.id, WAIT).await;
    assert_eq!(second_ack.kind, MessageKind::Response);

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    assert_eq!(finished.exit_summary.as_deref(), Some("done"));
    assert_eq!(harness.runtime.teardown_count(), 1);
}

#[tokio::test]
#[serial]
async fn contradictory_duplicate_result_is_rejected_and_logged() {
    // Same batching trick: both results land before the first drain.
    let harness = harness(FakeRuntime::with_behavior(FakeBehavior::NeverReady)).await;
    let (_, session) = harness
        .manager
        .request_session("demo", TaskMode::Closed, "codex")
        .await
        .expect("request session");

    let container = wait_for_container(&harness.state, &session.id, WAIT).await;
    let channel = agent_channel(&harness.state, &session);
    let first = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "ok", "summary": "done" }),
    );
    let second = BusMessage::request(
        MessageKind::Result,
        json!({ "status": "failed", "summary": "actually broke" }),
    );
    channel.submit_request(&first).expect("submit first");
    channel.submit_request(&second).expect("submit second");
    harness.runtime.set_probe(&container, ProbeStatus::Running);

    let second_answer = wait_for_response(&channel, &second.id, WAIT).await;
    assert_eq!(second_answer.kind, MessageKind::Error);

    let finished = wait_for_state(&harness.state, &session.id, SessionState::Reaped, WAIT).await;
    // The first verdict stands.
    assert_eq!(finished.exit_summary.as_deref(), Some("done"));

    // The disagreement itself was logged, never silently resolved.
    let conflicts = harness
        .state
        .events()
        .count_kind(&session.id, EventKind::ProtocolError)
        .await
        .expect("count");
    assert!(conflicts >= 1);
}
