use std::sync::Arc;

use agent_harness::bus::{codec, BusChannel, Inbound};
use agent_harness::models::message::{BusMessage, MessageKind};
use agent_harness::persistence::{db, processed_repo::ProcessedRepo};
use serde_json::json;
use tempfile::TempDir;

async fn channel(dir: &TempDir) -> (BusChannel, ProcessedRepo) {
    let pool = Arc::new(db::connect_memory().await.expect("db"));
    let processed = ProcessedRepo::new(pool);
    let channel = BusChannel::open(
        "sess-1",
        dir.path().join("bus"),
        processed.clone(),
    )
    .expect("open channel");
    (channel, processed)
}

#[tokio::test]
async fn requests_drain_in_write_order() {
    let dir = TempDir::new().expect("tempdir");
    let (channel, _) = channel(&dir).await;

    let first = BusMessage::request(MessageKind::Heartbeat, json!({ "n": 1 }));
    let second = BusMessage::request(MessageKind::Heartbeat, json!({ "n": 2 }));
    channel.submit_request(&first).expect("submit");
    channel.submit_request(&second).expect("submit");

    let drained = channel.drain_inbox().await.expect("drain");
    let ids: Vec<&str> = drained
        .iter()
        .map(|inbound| match inbound {
            Inbound::Request(m) => m.id.as_str(),
            other => panic!("unexpected inbound: {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
}

#[tokio::test]
async fn responding_archives_the_request_and_records_the_ledger() {
    let dir = TempDir::new().expect("tempdir");
    let (channel, processed) = channel(&dir).await;

    let request = BusMessage::request(MessageKind::Heartbeat, json!({}));
    channel.submit_request(&request).expect("submit");
    assert_eq!(channel.drain_inbox().await.expect("drain").len(), 1);

    channel.respond(&request.id, json!({ "seen": true })).await.expect("respond");

    // Inbox is empty, outbox holds one response named after the request.
    assert!(codec::scan(&channel.paths().inbox()).expect("scan").is_empty());
    let outbox = codec::scan(&channel.paths().outbox()).expect("scan");
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].file_id, request.id);
    let response = codec::read_message(&outbox[0].path).expect("read response");
    assert_eq!(response.kind, MessageKind::Response);
    assert_eq!(response.correlation_id.as_deref(), Some(request.id.as_str()));

    // Archive keeps the consumed request file.
    let archived = codec::scan(&channel.paths().archive()).expect("scan");
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].file_id, request.id);

    assert!(processed.lookup(&request.id).await.expect("lookup").is_some());
}

#[tokio::test]
async fn redelivery_after_restart_replays_the_cached_response() {
    let dir = TempDir::new().expect("tempdir");
    let pool = Arc::new(db::connect_memory().await.expect("db"));
    let processed = ProcessedRepo::new(Arc::clone(&pool));
    let bus_root = dir.path().join("bus");

    let request = BusMessage::request(MessageKind::Heartbeat, json!({}));
    let request_json = serde_json::to_string_pretty(&request).expect("serialize");

    {
        let channel =
            BusChannel::open("sess-1", bus_root.clone(), processed.clone()).expect("open");
        channel.submit_request(&request).expect("submit");
        assert_eq!(channel.drain_inbox().await.expect("drain").len(), 1);
        channel.respond(&request.id, json!({ "seen": true })).await.expect("respond");
    }

    // Simulated host restart: a fresh channel over the same ledger, with
    // the same message redelivered to the inbox.
    let channel = BusChannel::open("sess-1", bus_root, processed).expect("reopen");
    codec::write_raw(&channel.paths().inbox(), &request.id, &request_json).expect("redeliver");

    let drained = channel.drain_inbox().await.expect("drain");
    assert_eq!(drained.len(), 1);
    assert!(matches!(&drained[0], Inbound::Replayed(m) if m.id == request.id));

    // Still exactly one response for the id, and the inbox copy is gone.
    let outbox = codec::scan(&channel.paths().outbox()).expect("scan");
    assert_eq!(
        outbox.iter().filter(|f| f.file_id == request.id).count(),
        1
    );
    assert!(codec::scan(&channel.paths().inbox()).expect("scan").is_empty());
}

#[tokio::test]
async fn malformed_files_surface_with_a_fallback_id() {
    let dir = TempDir::new().expect("tempdir");
    let (channel, _) = channel(&dir).await;

    std::fs::write(channel.paths().inbox().join("000001-garbled.json"), "{{{")
        .expect("write junk");

    let drained = channel.drain_inbox().await.expect("drain");
    assert_eq!(drained.len(), 1);
    match &drained[0] {
        Inbound::Malformed { fallback_id, .. } => assert_eq!(fallback_id, "garbled"),
        other => panic!("expected malformed, got {other:?}"),
    }
    // The junk file was consumed, not left to loop forever.
    assert!(codec::scan(&channel.paths().inbox()).expect("scan").is_empty());
}

#[tokio::test]
async fn non_request_kinds_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let (channel, _) = channel(&dir).await;

    let bogus = BusMessage::control(MessageKind::Cancel, json!({}));
    codec::write_message(&channel.paths().inbox(), &bogus.id, &bogus).expect("write");

    let drained = channel.drain_inbox().await.expect("drain");
    assert_eq!(drained.len(), 1);
    assert!(matches!(&drained[0], Inbound::Malformed { fallback_id, .. } if *fallback_id == bogus.id));
}

#[tokio::test]
async fn control_messages_land_in_the_control_directory() {
    let dir = TempDir::new().expect("tempdir");
    let (channel, _) = channel(&dir).await;

    channel
        .send_control(MessageKind::Steer, json!({ "answer": "ship it" }))
        .expect("send control");

    let control = codec::scan(&channel.paths().control()).expect("scan");
    assert_eq!(control.len(), 1);
    let message = codec::read_message(&control[0].path).expect("read");
    assert_eq!(message.kind, MessageKind::Steer);
    assert_eq!(message.payload["answer"], "ship it");
}
