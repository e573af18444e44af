//! The single synchronization point for one entity kind's local state.
//!
//! Every writer (optimistic mutations, reconciliations, rollbacks, change-stream
//! merges, the initial load) goes through [`LocalStore::apply`]. The closure runs
//! synchronously against the latest snapshot and its result is published to all
//! readers in the same step, so there is no window where the UI-visible state and
//! the latest snapshot disagree.

use log::warn;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use super::mapping::{sort_entities, SyncEntity};

pub struct LocalStore<E: SyncEntity> {
    state: Arc<watch::Sender<Vec<E>>>,
}

impl<E: SyncEntity> Clone for LocalStore<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<E: SyncEntity> Default for LocalStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SyncEntity> LocalStore<E> {
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    pub fn with_items(mut items: Vec<E>) -> Self {
        normalize(&mut items);
        let (state, _) = watch::channel(items);
        Self {
            state: Arc::new(state),
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Vec<E> {
        self.state.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.state.borrow().iter().find(|item| item.id() == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.borrow().iter().any(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    /// Receiver that wakes whenever a transform actually changes the state.
    pub fn subscribe(&self) -> watch::Receiver<Vec<E>> {
        self.state.subscribe()
    }

    /// Apply `transform` to the latest snapshot and publish the result.
    ///
    /// The transform must not block; it runs while the state is locked. After it
    /// returns the list is re-sorted and de-duplicated, and subscribers are only
    /// woken if the resulting list differs from the previous one.
    pub fn apply<R>(&self, transform: impl FnOnce(&mut Vec<E>) -> R) -> R {
        let mut output = None;
        self.state.send_if_modified(|items| {
            let before = items.clone();
            output = Some(transform(items));
            normalize(items);
            *items != before
        });
        // send_if_modified always runs the closure exactly once
        match output {
            Some(value) => value,
            None => unreachable!("watch::Sender::send_if_modified skipped its closure"),
        }
    }

    /// Publish `items` wholesale (initial load, delete rollback).
    pub fn replace(&self, items: Vec<E>) {
        self.apply(move |current| *current = items);
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }
}

fn normalize<E: SyncEntity>(items: &mut Vec<E>) {
    let mut seen = HashSet::with_capacity(items.len());
    let before = items.len();
    items.retain(|item| seen.insert(item.id().to_string()));
    if items.len() != before {
        warn!(
            "[Store] Dropped {} duplicate {} entries",
            before - items.len(),
            E::TABLE
        );
    }
    sort_entities(items);
}
