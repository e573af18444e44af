//! Optimistic create/update/delete/reorder.
//!
//! Each mutation is applied to the [`LocalStore`] before the persistence call
//! starts, then either reconciled with the server's row or rolled back. The
//! store is touched only through `apply`, never across an `.await`.
//!
//! Two calls on the same id are not serialized against each other: each keeps
//! its own rollback snapshot, and whichever settles last decides the local
//! state.

use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::mapping::{is_temp_id, new_temp_id, position_of, Positioned, SyncEntity};
use super::store::LocalStore;
use crate::error::{PersistenceError, SyncError, SyncResult};
use crate::notify::{Notification, Notifier};
use crate::persistence::Persistence;
use crate::utils::logging;
use crate::utils::retry::{retry_with_policy, RetryPolicies, RetryPolicy};

/// Outcome of [`MutationCoordinator::reorder`]. Failed position writes are
/// reported here and are not rolled back.
#[derive(Debug, Default)]
pub struct ReorderReport {
    /// Entities whose position changed locally.
    pub moved: usize,
    pub persisted: usize,
    pub failed: Vec<(String, SyncError)>,
    /// Moved entities without a server id yet. Their new position is local only.
    pub skipped_unconfirmed: Vec<String>,
}

impl ReorderReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct MutationCoordinator<E: SyncEntity> {
    owner_id: String,
    store: LocalStore<E>,
    persistence: Arc<dyn Persistence>,
    policies: RetryPolicies,
    notifier: Arc<dyn Notifier>,
    lifetime: CancellationToken,
}

impl<E: SyncEntity> MutationCoordinator<E> {
    pub fn new(
        owner_id: impl Into<String>,
        store: LocalStore<E>,
        persistence: Arc<dyn Persistence>,
        policies: RetryPolicies,
        notifier: Arc<dyn Notifier>,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            store,
            persistence,
            policies,
            notifier,
            lifetime,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Add an entity with a temporary id, then swap in the server's row.
    pub async fn create(&self, draft: E::Draft) -> SyncResult<E> {
        self.ensure_active()?;
        let started = Instant::now();
        let temp_id = new_temp_id();

        let optimistic = self.store.apply(|items| {
            let entity = E::from_draft(draft, temp_id.clone(), &self.owner_id, items);
            items.push(entity.clone());
            entity
        });
        debug!("[Sync] Created {} {} optimistically", E::TABLE, temp_id);

        let result = match optimistic.insert_row() {
            Ok(row) => {
                let persistence = self.persistence.clone();
                let owner_id = self.owner_id.clone();
                self.persist(&self.policies.interactive, move || {
                    let persistence = persistence.clone();
                    let owner_id = owner_id.clone();
                    let row = row.clone();
                    async move { persistence.insert(E::TABLE, &owner_id, row).await }
                })
                .await
                .and_then(|row| Ok(E::from_row(row)?))
            }
            Err(e) => Err(e.into()),
        };

        let confirmed = match result {
            Ok(entity) => entity,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                self.store.apply(|items| items.retain(|item| item.id() != temp_id));
                return Err(self.fail("create", e));
            }
        };

        // The change stream may already have delivered the server row
        self.store.apply(|items| {
            items.retain(|item| item.id() != temp_id);
            match position_of(items, confirmed.id()) {
                Some(index) => items[index] = confirmed.clone(),
                None => items.push(confirmed.clone()),
            }
        });

        logging::log_mutation(E::TABLE, "create", confirmed.id(), started.elapsed());
        self.notifier
            .notify(Notification::success(format!("{} created", E::LABEL)));
        Ok(confirmed)
    }

    /// Patch an entity in place. Returns `Ok(None)` without touching anything
    /// when the id is not in the local state.
    pub async fn update(&self, id: &str, patch: E::Patch) -> SyncResult<Option<E>> {
        self.ensure_active()?;
        if is_temp_id(id) {
            // A temp id that is gone has already been confirmed or removed
            if !self.store.contains(id) {
                debug!("[Sync] Update of missing {} {} ignored", E::TABLE, id);
                return Ok(None);
            }
            return Err(self.fail("update", unconfirmed(id)));
        }
        let started = Instant::now();
        let patch_row = match E::patch_row(&patch) {
            Ok(row) => row,
            Err(e) => return Err(self.fail("update", e.into())),
        };

        let previous = self.store.apply(|items| {
            let index = position_of(items, id)?;
            let previous = items[index].clone();
            items[index] = previous.apply_patch(&patch);
            Some(previous)
        });
        let Some(previous) = previous else {
            debug!("[Sync] Update of missing {} {} ignored", E::TABLE, id);
            return Ok(None);
        };

        let persistence = self.persistence.clone();
        let owner_id = self.owner_id.clone();
        let target = id.to_string();
        let result = self
            .persist(&self.policies.interactive, move || {
                let persistence = persistence.clone();
                let owner_id = owner_id.clone();
                let target = target.clone();
                let patch_row = patch_row.clone();
                async move { persistence.update(E::TABLE, &target, &owner_id, patch_row).await }
            })
            .await
            .and_then(|row| Ok(E::from_row(row)?));

        match result {
            Ok(confirmed) => {
                // A concurrent delete wins; never bring the entity back
                self.store.apply(|items| {
                    if let Some(index) = position_of(items, id) {
                        items[index] = confirmed.clone();
                    }
                });
                logging::log_mutation(E::TABLE, "update", id, started.elapsed());
                self.notifier
                    .notify(Notification::success(format!("{} updated", E::LABEL)));
                Ok(Some(confirmed))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                self.store.apply(|items| {
                    if let Some(index) = position_of(items, id) {
                        items[index] = previous;
                    }
                });
                Err(self.fail("update", e))
            }
        }
    }

    /// Remove an entity. Returns `Ok(false)` without touching anything when the
    /// id is not in the local state.
    pub async fn delete(&self, id: &str) -> SyncResult<bool> {
        self.ensure_active()?;
        if is_temp_id(id) {
            // A temp id that is gone has already been confirmed or removed
            if !self.store.contains(id) {
                debug!("[Sync] Delete of missing {} {} ignored", E::TABLE, id);
                return Ok(false);
            }
            return Err(self.fail("delete", unconfirmed(id)));
        }
        let started = Instant::now();

        let previous = self.store.apply(|items| {
            let index = position_of(items, id)?;
            let previous = items.clone();
            items.remove(index);
            Some(previous)
        });
        let Some(previous) = previous else {
            debug!("[Sync] Delete of missing {} {} ignored", E::TABLE, id);
            return Ok(false);
        };

        let persistence = self.persistence.clone();
        let owner_id = self.owner_id.clone();
        let target = id.to_string();
        let result = self
            .persist(&self.policies.interactive, move || {
                let persistence = persistence.clone();
                let owner_id = owner_id.clone();
                let target = target.clone();
                async move { persistence.delete(E::TABLE, &target, &owner_id).await }
            })
            .await;

        match result {
            Ok(()) => {
                logging::log_mutation(E::TABLE, "delete", id, started.elapsed());
                self.notifier
                    .notify(Notification::success(format!("{} deleted", E::LABEL)));
                Ok(true)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                // Removal changed the list shape, so restore all of it
                self.store.replace(previous);
                Err(self.fail("delete", e))
            }
        }
    }

    /// Run a persistence call under `policy`, abandoning it if the engine is
    /// torn down first. A cancelled call never reports its result.
    pub(super) async fn persist<T, F, Fut>(&self, policy: &RetryPolicy, operation: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.lifetime.cancelled() => return Err(self.cancelled()),
            result = retry_with_policy(policy, operation) => result,
        };
        if self.lifetime.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(result?)
    }

    fn ensure_active(&self) -> SyncResult<()> {
        if self.lifetime.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn cancelled(&self) -> SyncError {
        SyncError::Cancelled(self.owner_id.clone())
    }

    /// Log a terminal failure and notify the user once.
    fn fail(&self, operation: &str, error: SyncError) -> SyncError {
        logging::log_error_with_context(&error, &format!("{} {}", operation, E::TABLE));
        self.notifier.notify(Notification::failure(format!(
            "Could not {} {}: {}",
            operation,
            E::LABEL.to_lowercase(),
            error.to_safe_string()
        )));
        error
    }
}

impl<E: Positioned> MutationCoordinator<E> {
    /// Assign each listed id its 0-based index as position, then write every
    /// changed position concurrently with a single attempt each. Entities not
    /// listed are placed after the listed ones. A repeated id is rejected.
    pub async fn reorder(&self, ordered_ids: &[String]) -> SyncResult<ReorderReport> {
        self.ensure_active()?;
        let started = Instant::now();

        let mut listed = HashMap::with_capacity(ordered_ids.len());
        for (index, id) in ordered_ids.iter().enumerate() {
            if listed.insert(id.as_str(), index as i64).is_some() {
                return Err(self.fail(
                    "reorder",
                    SyncError::invalid_input(format!("{} is listed more than once", id)),
                ));
            }
        }

        let moved: Vec<(String, i64)> = self.store.apply(|items| {
            // Unlisted entities follow the listed ones in their current order
            let mut next = ordered_ids.len() as i64;
            let mut moved = Vec::new();
            for item in items.iter_mut() {
                let position = match listed.get(item.id()) {
                    Some(&position) => position,
                    None => {
                        next += 1;
                        next - 1
                    }
                };
                if item.position() != position {
                    item.set_position(position);
                    moved.push((item.id().to_string(), position));
                }
            }
            moved
        });

        let mut report = ReorderReport {
            moved: moved.len(),
            ..ReorderReport::default()
        };

        let mut writes = JoinSet::new();
        for (id, position) in moved {
            if is_temp_id(&id) {
                report.skipped_unconfirmed.push(id);
                continue;
            }
            let persistence = self.persistence.clone();
            let owner_id = self.owner_id.clone();
            let policy = self.policies.reorder;
            let mut fields = serde_json::Map::new();
            fields.insert(E::POSITION_FIELD.to_string(), Value::from(position));
            let patch = Value::Object(fields);

            writes.spawn(async move {
                let result = retry_with_policy(&policy, || {
                    persistence.update(E::TABLE, &id, &owner_id, patch.clone())
                })
                .await;
                (id, result)
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => {
                    writes.abort_all();
                    return Err(self.cancelled());
                }
                joined = writes.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok((_, Ok(_)))) => report.persisted += 1,
                Some(Ok((id, Err(e)))) => report.failed.push((id, e.into())),
                Some(Err(e)) => {
                    warn!("[Sync] Position write task ended abnormally: {}", e);
                    report
                        .failed
                        .push((String::new(), SyncError::Anyhow(anyhow::anyhow!("position write aborted: {}", e))));
                }
            }
        }

        if !report.is_complete() {
            for (id, error) in &report.failed {
                warn!("[Sync] Failed to save position of {} {}: {}", E::TABLE, id, error);
            }
            self.notifier.notify(Notification::failure(format!(
                "Could not save the new order of {} of {} {}s",
                report.failed.len(),
                report.moved,
                E::LABEL.to_lowercase()
            )));
        }
        logging::log_mutation(E::TABLE, "reorder", &format!("{} moved", report.moved), started.elapsed());
        Ok(report)
    }
}

fn unconfirmed(id: &str) -> SyncError {
    SyncError::invalid_input(format!("{} has not been saved yet", id))
}
