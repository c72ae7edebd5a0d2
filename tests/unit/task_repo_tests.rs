use std::sync::Arc;

use agent_harness::models::task::{Task, TaskMode, TaskStatus};
use agent_harness::persistence::{db, task_repo::TaskRepo};
use agent_harness::AppError;

async fn repo() -> TaskRepo {
    let pool = db::connect_memory().await.expect("db");
    TaskRepo::new(Arc::new(pool))
}

#[tokio::test]
async fn create_get_and_update_status() {
    let repo = repo().await;
    let task = Task::new("demo".into(), TaskMode::Closed, "codex".into());
    let created = repo.create(&task).await.expect("create");
    assert_eq!(created.status, TaskStatus::Pending);

    let fetched = repo.get_by_id(&created.id).await.expect("get");
    assert_eq!(fetched.goal, "demo");
    assert_eq!(fetched.mode, TaskMode::Closed);

    let updated = repo
        .set_status(&created.id, TaskStatus::Running)
        .await
        .expect("set status");
    assert_eq!(updated.status, TaskStatus::Running);
    assert!(updated.updated_at >= created.updated_at);
}

#[tokio::test]
async fn nested_tasks_persist_their_lineage() {
    let repo = repo().await;
    let parent = repo
        .create(&Task::new("root".into(), TaskMode::Closed, "codex".into()))
        .await
        .expect("create parent");
    let child = repo
        .create(&Task::child_of(
            &parent,
            "sub".into(),
            TaskMode::Closed,
            "codex".into(),
        ))
        .await
        .expect("create child");

    let fetched = repo.get_by_id(&child.id).await.expect("get child");
    assert_eq!(fetched.parent_task_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(fetched.depth, 1);

    let all = repo.list().await.expect("list");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn missing_task_is_not_found() {
    let repo = repo().await;
    assert!(matches!(
        repo.get_by_id("nope").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        repo.set_status("nope", TaskStatus::Failed).await,
        Err(AppError::NotFound(_))
    ));
}
