//! Merges change-stream events into the local store.
//!
//! Delivery is at-least-once and unordered, so every rule here is idempotent:
//! inserts of a known id are ignored, updates never create, deletes of an
//! unknown id do nothing.

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::mapping::{position_of, SyncEntity};
use super::normalizer::normalize_change;
use super::store::LocalStore;
use crate::error::{SyncError, SyncResult};
use crate::models::{ChangeEvent, RowChange};
use crate::persistence::{ChangeSource, ChangeSubscription};
use crate::utils::logging;

/// Why a subscriber task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The owning engine was shut down.
    Cancelled,
    /// The source closed the stream. Reconnecting is up to the caller.
    Closed,
}

/// Apply one canonical event to `items`. Returns whether anything changed.
pub fn merge_change<E: SyncEntity>(items: &mut Vec<E>, event: ChangeEvent<E>) -> bool {
    match event {
        ChangeEvent::Insert(entity) => {
            if position_of(items, entity.id()).is_some() {
                return false;
            }
            items.push(entity);
            true
        }
        ChangeEvent::Update(entity) => match position_of(items, entity.id()) {
            Some(index) => {
                let changed = items[index] != entity;
                items[index] = entity;
                changed
            }
            None => false,
        },
        ChangeEvent::Delete(id) => match position_of(items, &id) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        },
    }
}

pub struct ChangeStreamSubscriber<E: SyncEntity> {
    owner_id: String,
    store: LocalStore<E>,
    lifetime: CancellationToken,
}

impl<E: SyncEntity> ChangeStreamSubscriber<E> {
    pub fn new(owner_id: impl Into<String>, store: LocalStore<E>, lifetime: CancellationToken) -> Self {
        Self {
            owner_id: owner_id.into(),
            store,
            lifetime,
        }
    }

    /// Normalize and merge one raw change. Malformed rows and rows belonging to
    /// another owner are logged and dropped.
    pub fn handle(&self, change: RowChange) -> bool {
        if self.lifetime.is_cancelled() {
            return false;
        }

        let kind = change.kind;
        let event = match normalize_change::<E>(change) {
            Ok(event) => event,
            Err(e) => {
                warn!("[Stream] Dropping malformed {} {} event: {}", E::TABLE, kind.as_str(), e);
                return false;
            }
        };

        let id = match &event {
            ChangeEvent::Insert(entity) | ChangeEvent::Update(entity) => {
                if entity.owner_id() != self.owner_id {
                    debug!("[Stream] Ignoring {} {} for another owner", E::TABLE, entity.id());
                    return false;
                }
                entity.id().to_string()
            }
            ChangeEvent::Delete(id) => id.clone(),
        };

        let applied = self.store.apply(|items| merge_change(items, event));
        logging::log_change_event(E::TABLE, kind, &id, applied);
        applied
    }

    /// Open the owner's subscription and spawn the merge loop. The task ends
    /// when the lifetime token is cancelled or the source closes the stream.
    pub async fn start(self, source: &dyn ChangeSource) -> SyncResult<JoinHandle<StreamEnd>> {
        let subscription = source.subscribe(&self.owner_id, E::TABLE).await?;
        if self.lifetime.is_cancelled() {
            subscription.unsubscribe();
            return Err(SyncError::Cancelled(self.owner_id));
        }

        info!("[Stream] Subscribed to {} for owner {}", E::TABLE, self.owner_id);
        Ok(tokio::spawn(self.run(subscription)))
    }

    async fn run(self, mut subscription: ChangeSubscription) -> StreamEnd {
        let end = loop {
            tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => break StreamEnd::Cancelled,
                change = subscription.next() => match change {
                    Some(change) => {
                        self.handle(change);
                    }
                    None => break StreamEnd::Closed,
                },
            }
        };

        match end {
            StreamEnd::Cancelled => {
                debug!("[Stream] Unsubscribing from {} for owner {}", E::TABLE, self.owner_id);
                subscription.unsubscribe();
            }
            StreamEnd::Closed => {
                warn!("[Stream] {} stream closed for owner {}", E::TABLE, self.owner_id);
            }
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PoolTask;
    use crate::persistence::ChangeFeed;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn task_row(id: &str, position: i64, title: &str) -> Value {
        json!({
            "id": id,
            "user_id": "owner-1",
            "title": title,
            "position": position,
            "completed": false
        })
    }

    fn subscriber() -> ChangeStreamSubscriber<PoolTask> {
        ChangeStreamSubscriber::new("owner-1", LocalStore::new(), CancellationToken::new())
    }

    fn ids(store: &LocalStore<PoolTask>) -> Vec<String> {
        store.snapshot().into_iter().map(|task| task.id).collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let sub = subscriber();
        assert!(sub.handle(RowChange::insert(task_row("t-1", 0, "a"))));
        let once = sub.store.snapshot();

        assert!(!sub.handle(RowChange::insert(task_row("t-1", 0, "a"))));
        assert_eq!(sub.store.snapshot(), once);
    }

    #[test]
    fn test_insert_of_known_id_keeps_local_version() {
        let sub = subscriber();
        sub.handle(RowChange::insert(task_row("t-1", 0, "local")));
        sub.handle(RowChange::insert(task_row("t-1", 0, "echo")));
        assert_eq!(sub.store.get("t-1").unwrap().title, "local");
    }

    #[test]
    fn test_update_never_creates() {
        let sub = subscriber();
        assert!(!sub.handle(RowChange::update(None, task_row("t-9", 0, "ghost"))));
        assert!(sub.store.is_empty());
    }

    #[test]
    fn test_update_replaces_and_resorts() {
        let sub = subscriber();
        sub.handle(RowChange::insert(task_row("t-1", 0, "a")));
        sub.handle(RowChange::insert(task_row("t-2", 1, "b")));

        assert!(sub.handle(RowChange::update(None, task_row("t-1", 5, "a"))));
        assert_eq!(ids(&sub.store), vec!["t-2", "t-1"]);
    }

    #[test]
    fn test_delete_of_absent_id_is_noop() {
        let sub = subscriber();
        sub.handle(RowChange::insert(task_row("t-1", 0, "a")));
        assert!(!sub.handle(RowChange::delete(json!({ "id": "t-2" }))));
        assert_eq!(ids(&sub.store), vec!["t-1"]);
    }

    #[test]
    fn test_out_of_order_events() {
        let sub = subscriber();
        // Update and delete before the insert they refer to
        sub.handle(RowChange::update(None, task_row("t-1", 0, "late")));
        sub.handle(RowChange::delete(json!({ "id": "t-1" })));
        sub.handle(RowChange::insert(task_row("t-1", 0, "a")));
        sub.handle(RowChange::insert(task_row("t-0", -1, "z")));

        assert_eq!(ids(&sub.store), vec!["t-0", "t-1"]);
    }

    #[test]
    fn test_ignores_other_owner_and_malformed_rows() {
        let sub = subscriber();
        let mut foreign = task_row("t-1", 0, "a");
        foreign["user_id"] = json!("owner-2");

        assert!(!sub.handle(RowChange::insert(foreign)));
        assert!(!sub.handle(RowChange::insert(json!({ "title": "no id" }))));
        assert!(sub.store.is_empty());
    }

    #[test]
    fn test_cancelled_subscriber_applies_nothing() {
        let sub = subscriber();
        sub.lifetime.cancel();
        assert!(!sub.handle(RowChange::insert(task_row("t-1", 0, "a"))));
        assert!(sub.store.is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_merges_until_cancelled() {
        let feed = ChangeFeed::new();
        let store = LocalStore::<PoolTask>::new();
        let lifetime = CancellationToken::new();
        let mut state = store.subscribe();

        let handle = ChangeStreamSubscriber::new("owner-1", store.clone(), lifetime.clone())
            .start(&feed)
            .await
            .unwrap();

        feed.publish("owner-1", "pool_tasks", RowChange::insert(task_row("t-1", 0, "a")));
        tokio::time::timeout(Duration::from_secs(1), state.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&store), vec!["t-1"]);

        lifetime.cancel();
        assert_eq!(handle.await.unwrap(), StreamEnd::Cancelled);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_run_loop_reports_closed_stream() {
        let feed = ChangeFeed::new();
        let handle = subscriber().start(&feed).await.unwrap();

        feed.disconnect_all();
        assert_eq!(handle.await.unwrap(), StreamEnd::Closed);
    }
}
