use std::sync::Arc;

use agent_harness::persistence::{db, processed_repo::ProcessedRepo};

async fn repo() -> ProcessedRepo {
    let pool = db::connect_memory().await.expect("db");
    ProcessedRepo::new(Arc::new(pool))
}

#[tokio::test]
async fn unknown_ids_have_no_cached_response() {
    let repo = repo().await;
    assert!(repo.lookup("m1").await.expect("lookup").is_none());
}

#[tokio::test]
async fn recorded_responses_replay_from_cache() {
    let repo = repo().await;
    repo.record("m1", "sess-1", r#"{"ok":true}"#)
        .await
        .expect("record");

    let cached = repo.lookup("m1").await.expect("lookup");
    assert_eq!(cached.as_deref(), Some(r#"{"ok":true}"#));
}

#[tokio::test]
async fn duplicate_records_keep_the_first_response() {
    let repo = repo().await;
    repo.record("m1", "sess-1", "first").await.expect("record");
    repo.record("m1", "sess-1", "second").await.expect("re-record");

    let cached = repo.lookup("m1").await.expect("lookup");
    assert_eq!(cached.as_deref(), Some("first"));
}
