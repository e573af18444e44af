//! One owner's sync engine for one entity kind: local store, change stream,
//! initial load and mutations, sharing a single lifetime token.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::coordinator::{MutationCoordinator, ReorderReport};
use super::mapping::{is_temp_id, Positioned, SyncEntity};
use super::store::LocalStore;
use super::subscriber::{ChangeStreamSubscriber, StreamEnd};
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, Notifier};
use crate::persistence::Backend;
use crate::utils::logging;
use crate::utils::retry::RetryPolicies;

struct ActiveStream {
    token: CancellationToken,
    handle: JoinHandle<StreamEnd>,
}

pub struct SyncEngine<E: SyncEntity> {
    owner_id: String,
    store: LocalStore<E>,
    backend: Backend,
    policies: RetryPolicies,
    notifier: Arc<dyn Notifier>,
    coordinator: MutationCoordinator<E>,
    lifetime: CancellationToken,
    stream: Mutex<Option<ActiveStream>>,
}

impl<E: SyncEntity> SyncEngine<E> {
    pub fn new(
        owner_id: impl Into<String>,
        backend: Backend,
        policies: RetryPolicies,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let owner_id = owner_id.into();
        let store = LocalStore::new();
        let lifetime = CancellationToken::new();
        let coordinator = MutationCoordinator::new(
            owner_id.clone(),
            store.clone(),
            backend.persistence.clone(),
            policies,
            notifier.clone(),
            lifetime.clone(),
        );

        Self {
            owner_id,
            store,
            backend,
            policies,
            notifier,
            coordinator,
            lifetime,
            stream: Mutex::new(None),
        }
    }

    /// Subscribe, then load. Subscribing first means no change made after the
    /// load's query is missed.
    pub async fn start(&self) -> SyncResult<usize> {
        self.subscribe().await?;
        self.load().await
    }

    /// Open the change stream, replacing any stream this engine already has.
    pub async fn subscribe(&self) -> SyncResult<()> {
        if self.lifetime.is_cancelled() {
            return Err(SyncError::Cancelled(self.owner_id.clone()));
        }
        self.stop_stream();

        let token = self.lifetime.child_token();
        let subscriber = ChangeStreamSubscriber::new(self.owner_id.clone(), self.store.clone(), token.clone());
        let handle = subscriber.start(self.backend.changes.as_ref()).await?;

        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = stream.replace(ActiveStream { token, handle }) {
            // A concurrent subscribe won the race; keep only the newest stream
            previous.token.cancel();
        }
        Ok(())
    }

    /// Reopen the change stream after the source dropped it.
    pub async fn resubscribe(&self) -> SyncResult<()> {
        info!("[Sync] Resubscribing {} for owner {}", E::TABLE, self.owner_id);
        self.subscribe().await
    }

    pub fn is_stream_active(&self) -> bool {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream
            .as_ref()
            .is_some_and(|active| !active.token.is_cancelled() && !active.handle.is_finished())
    }

    fn stop_stream(&self) {
        let previous = self.stream.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    /// Fetch the owner's rows with the initial-load policy and make them the
    /// local state. Entities still waiting for their server id are kept.
    /// Returns the number of rows loaded.
    pub async fn load(&self) -> SyncResult<usize> {
        let started = Instant::now();
        let persistence = self.backend.persistence.clone();
        let owner_id = self.owner_id.clone();
        let query = E::default_query();

        let rows = self
            .coordinator
            .persist(&self.policies.initial_load, move || {
                let persistence = persistence.clone();
                let owner_id = owner_id.clone();
                let query = query.clone();
                async move { persistence.list(E::TABLE, &owner_id, &query).await }
            })
            .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                logging::log_error_with_context(&e, &format!("load {}", E::TABLE));
                self.notifier.notify(Notification::failure(format!(
                    "Could not load {}s: {}",
                    E::LABEL.to_lowercase(),
                    e.to_safe_string()
                )));
                return Err(e);
            }
        };

        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            match E::from_row(row) {
                Ok(entity) => loaded.push(entity),
                Err(e) => warn!("[Sync] Skipping malformed {} row: {}", E::TABLE, e),
            }
        }
        let count = loaded.len();

        self.store.apply(|items| {
            items.retain(|item| is_temp_id(item.id()));
            items.extend(loaded);
        });
        logging::log_initial_load(E::TABLE, &self.owner_id, count, started.elapsed());
        Ok(count)
    }

    pub async fn create(&self, draft: E::Draft) -> SyncResult<E> {
        self.coordinator.create(draft).await
    }

    pub async fn update(&self, id: &str, patch: E::Patch) -> SyncResult<Option<E>> {
        self.coordinator.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> SyncResult<bool> {
        self.coordinator.delete(id).await
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn store(&self) -> &LocalStore<E> {
        &self.store
    }

    pub fn snapshot(&self) -> Vec<E> {
        self.store.snapshot()
    }

    /// Receiver for the UI; wakes on every published state change.
    pub fn subscribe_state(&self) -> watch::Receiver<Vec<E>> {
        self.store.subscribe()
    }

    /// Stop the change stream and turn every in-flight call of this engine
    /// into a no-op against its state.
    pub fn shutdown(&self) {
        if !self.lifetime.is_cancelled() {
            debug!("[Sync] Shutting down {} engine for owner {}", E::TABLE, self.owner_id);
            self.lifetime.cancel();
        }
        self.stop_stream();
    }

    pub fn is_shut_down(&self) -> bool {
        self.lifetime.is_cancelled()
    }
}

impl<E: Positioned> SyncEngine<E> {
    pub async fn reorder(&self, ordered_ids: &[String]) -> SyncResult<ReorderReport> {
        self.coordinator.reorder(ordered_ids).await
    }
}

impl<E: SyncEntity> Drop for SyncEngine<E> {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PoolTask, PoolTaskDraft, PoolTaskPatch};
    use crate::notify::LogNotifier;
    use crate::persistence::{MemoryStore, Persistence};
    use serde_json::json;
    use std::time::Duration;

    fn engine(backend: &MemoryStore, owner_id: &str) -> SyncEngine<PoolTask> {
        SyncEngine::new(
            owner_id,
            Backend::local(Arc::new(backend.clone())),
            RetryPolicies::default(),
            Arc::new(LogNotifier),
        )
    }

    async fn wait_for<F>(engine: &SyncEngine<PoolTask>, mut done: F)
    where
        F: FnMut(&[PoolTask]) -> bool,
    {
        let mut state = engine.subscribe_state();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done(&state.borrow_and_update()) {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_loads_sorted_rows() {
        let backend = MemoryStore::new();
        backend.insert("pool_tasks", "owner-1", json!({ "title": "b", "position": 1 })).await.unwrap();
        backend.insert("pool_tasks", "owner-1", json!({ "title": "a", "position": 0 })).await.unwrap();
        backend.insert("pool_tasks", "owner-2", json!({ "title": "x", "position": 0 })).await.unwrap();

        let engine = engine(&backend, "owner-1");
        assert_eq!(engine.start().await.unwrap(), 2);
        assert!(engine.is_stream_active());

        let titles: Vec<_> = engine.snapshot().into_iter().map(|task| task.title).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_load_skips_malformed_rows() {
        let backend = MemoryStore::new();
        backend.insert("pool_tasks", "owner-1", json!({ "title": "ok", "position": 0 })).await.unwrap();
        backend.insert("pool_tasks", "owner-1", json!({ "position": "not a number" })).await.unwrap();

        let engine = engine(&backend, "owner-1");
        assert_eq!(engine.load().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_changes_propagate_between_sessions() {
        let backend = MemoryStore::new();
        let first = engine(&backend, "owner-1");
        let second = engine(&backend, "owner-1");
        first.start().await.unwrap();
        second.start().await.unwrap();

        let created = first.create(PoolTaskDraft::new("shared")).await.unwrap();
        wait_for(&second, |tasks| tasks.iter().any(|task| task.id == created.id)).await;

        first.update(&created.id, PoolTaskPatch::title("renamed")).await.unwrap();
        wait_for(&second, |tasks| tasks.iter().any(|task| task.title == "renamed")).await;

        first.delete(&created.id).await.unwrap();
        wait_for(&second, |tasks| tasks.is_empty()).await;

        // The writer's own echoes settle to the same state
        wait_for(&first, |tasks| tasks.is_empty()).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_stream_and_rejects_calls() {
        let backend = MemoryStore::new();
        let engine = engine(&backend, "owner-1");
        engine.start().await.unwrap();

        engine.shutdown();
        assert!(engine.is_shut_down());
        assert!(!engine.is_stream_active());

        let err = engine.create(PoolTaskDraft::new("late")).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_after_stream_drop() {
        let backend = MemoryStore::new();
        let engine = engine(&backend, "owner-1");
        engine.start().await.unwrap();

        backend.feed().disconnect_all();
        tokio::time::timeout(Duration::from_secs(2), async {
            while engine.is_stream_active() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        engine.resubscribe().await.unwrap();
        assert!(engine.is_stream_active());

        backend.insert("pool_tasks", "owner-1", json!({ "title": "after", "position": 0 })).await.unwrap();
        wait_for(&engine, |tasks| tasks.len() == 1).await;
    }
}
