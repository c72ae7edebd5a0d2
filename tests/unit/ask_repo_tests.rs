use std::sync::Arc;

use agent_harness::persistence::ask_repo::{Ask, AskRepo, AskStatus};
use agent_harness::persistence::db;
use agent_harness::AppError;

async fn repo() -> AskRepo {
    let pool = db::connect_memory().await.expect("db");
    AskRepo::new(Arc::new(pool))
}

#[tokio::test]
async fn pending_asks_resolve_in_creation_order() {
    let repo = repo().await;
    let first = repo
        .create(&Ask::new("sess-1".into(), "m1".into(), "which db?".into()))
        .await
        .expect("create");
    // A later question for the same session.
    let mut second = Ask::new("sess-1".into(), "m2".into(), "which branch?".into());
    second.created_at = first.created_at + chrono::Duration::seconds(1);
    repo.create(&second).await.expect("create");

    let oldest = repo
        .oldest_pending("sess-1")
        .await
        .expect("query")
        .expect("one pending");
    assert_eq!(oldest.id, first.id);

    let resolved = repo.resolve(&first.id, "sqlite").await.expect("resolve");
    assert_eq!(resolved.status, AskStatus::Answered);
    assert_eq!(resolved.answer.as_deref(), Some("sqlite"));
    assert!(resolved.answered_at.is_some());

    let next = repo
        .oldest_pending("sess-1")
        .await
        .expect("query")
        .expect("second pending");
    assert_eq!(next.id, second.id);
}

#[tokio::test]
async fn resolving_twice_conflicts() {
    let repo = repo().await;
    let ask = repo
        .create(&Ask::new("sess-1".into(), "m1".into(), "deploy?".into()))
        .await
        .expect("create");
    repo.resolve(&ask.id, "yes").await.expect("first resolve");

    assert!(matches!(
        repo.resolve(&ask.id, "no").await,
        Err(AppError::Conflict(_))
    ));
    let current = repo.get_by_id(&ask.id).await.expect("get");
    assert_eq!(current.answer.as_deref(), Some("yes"));
}

#[tokio::test]
async fn expiry_only_touches_pending_questions() {
    let repo = repo().await;
    let pending = repo
        .create(&Ask::new("sess-1".into(), "m1".into(), "a?".into()))
        .await
        .expect("create");
    let answered = repo
        .create(&Ask::new("sess-1".into(), "m2".into(), "b?".into()))
        .await
        .expect("create");
    repo.resolve(&answered.id, "done").await.expect("resolve");

    repo.expire(&pending.id).await.expect("expire pending");
    repo.expire(&answered.id).await.expect("expire answered is a no-op");

    assert_eq!(
        repo.get_by_id(&pending.id).await.expect("get").status,
        AskStatus::Expired
    );
    assert_eq!(
        repo.get_by_id(&answered.id).await.expect("get").status,
        AskStatus::Answered
    );
    assert!(repo.oldest_pending("sess-1").await.expect("query").is_none());
}
