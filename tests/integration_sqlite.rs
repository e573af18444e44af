use openplan::models::{ListQuery, PoolTask, PoolTaskDraft, PoolTaskPatch};
use openplan::persistence::{Backend, Persistence, SqliteStore};
use openplan::{LogNotifier, PlannerSession, RetryPolicies, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn temp_db_path() -> PathBuf {
    let temp_file = NamedTempFile::new().unwrap();
    let (_, path) = temp_file.keep().unwrap();
    path
}

fn pool_engine(store: &SqliteStore, owner_id: &str) -> SyncEngine<PoolTask> {
    SyncEngine::new(
        owner_id,
        Backend::local(Arc::new(store.clone())),
        RetryPolicies::default(),
        Arc::new(LogNotifier),
    )
}

#[tokio::test]
async fn test_pool_workflow_survives_reopen() {
    let path = temp_db_path();

    {
        let store = SqliteStore::open(&path).await.unwrap();
        let engine = pool_engine(&store, "owner-1");
        engine.start().await.unwrap();

        // 1. Create three tasks; positions follow creation order
        let first = engine.create(PoolTaskDraft::new("Plan sprint")).await.unwrap();
        let second = engine.create(PoolTaskDraft::new("Review PRs")).await.unwrap();
        let third = engine.create(PoolTaskDraft::new("Write notes")).await.unwrap();
        assert_eq!(
            engine.snapshot().iter().map(|task| task.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // 2. Complete one, delete another, move the last to the top
        engine.update(&first.id, PoolTaskPatch::completed(true)).await.unwrap();
        engine.delete(&second.id).await.unwrap();
        let report = engine
            .reorder(&[third.id.clone(), first.id.clone()])
            .await
            .unwrap();
        assert!(report.is_complete());
        engine.shutdown();
    }

    // 3. A new process sees the persisted state
    let store = SqliteStore::open(&path).await.unwrap();
    let engine = pool_engine(&store, "owner-1");
    assert_eq!(engine.start().await.unwrap(), 2);

    let tasks = engine.snapshot();
    assert_eq!(tasks[0].title, "Write notes");
    assert_eq!(tasks[1].title, "Plan sprint");
    assert!(tasks[1].completed);
}

#[tokio::test]
async fn test_rows_are_scoped_by_owner() {
    let store = SqliteStore::open(&temp_db_path()).await.unwrap();

    let alice = pool_engine(&store, "alice");
    let bob = pool_engine(&store, "bob");
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    let task = alice.create(PoolTaskDraft::new("private")).await.unwrap();

    // Bob can neither see nor change Alice's row
    assert!(store.list("pool_tasks", "bob", &ListQuery::new()).await.unwrap().is_empty());
    assert!(store
        .update("pool_tasks", &task.id, "bob", serde_json::json!({ "title": "mine now" }))
        .await
        .is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(bob.snapshot().is_empty());
    assert_eq!(alice.snapshot()[0].title, "private");
}

#[tokio::test]
async fn test_session_over_sqlite_sees_other_session_writes() {
    let store = SqliteStore::open(&temp_db_path()).await.unwrap();
    let mut desktop = PlannerSession::new(
        Backend::local(Arc::new(store.clone())),
        RetryPolicies::default(),
        Arc::new(LogNotifier),
    );
    let mut tablet = PlannerSession::new(
        Backend::local(Arc::new(store.clone())),
        RetryPolicies::default(),
        Arc::new(LogNotifier),
    );

    let desktop_engines = desktop.sign_in("owner-1").await.unwrap();
    let tablet_engines = tablet.sign_in("owner-1").await.unwrap();

    let task = desktop_engines.pool.create(PoolTaskDraft::new("shared")).await.unwrap();

    let mut state = tablet_engines.pool.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.borrow_and_update().iter().any(|t| t.id == task.id) {
            state.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}
