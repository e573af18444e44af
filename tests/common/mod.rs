#![allow(dead_code)]

use async_trait::async_trait;
use openplan::models::ListQuery;
use openplan::persistence::{Backend, ChangeSource, ChangeSubscription, MemoryStore, Persistence};
use openplan::PersistenceError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Wraps a [`MemoryStore`] and injects failures: queued ones are used first,
/// then the sticky one (if any). Writes can be held at a gate.
pub struct FlakyBackend {
    pub store: MemoryStore,
    queued: Mutex<VecDeque<PersistenceError>>,
    sticky: Mutex<Option<PersistenceError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl FlakyBackend {
    pub fn new(store: MemoryStore) -> Arc<Self> {
        Arc::new(Self {
            store,
            queued: Mutex::new(VecDeque::new()),
            sticky: Mutex::new(None),
            gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        })
    }

    pub fn backend(self: &Arc<Self>) -> Backend {
        Backend::new(self.clone(), self.clone())
    }

    pub fn fail_next(&self, error: PersistenceError) {
        self.queued.lock().unwrap().push_back(error);
    }

    pub fn fail_always(&self, error: PersistenceError) {
        *self.sticky.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        self.queued.lock().unwrap().clear();
        *self.sticky.lock().unwrap() = None;
    }

    /// Hold every following write until the returned gate is notified.
    pub fn hold_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.call_times.lock().unwrap().clear();
    }

    async fn enter_write(&self) -> Result<(), PersistenceError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.enter()
    }

    fn enter(&self) -> Result<(), PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let queued = self.queued.lock().unwrap().pop_front();
        if let Some(error) = queued {
            return Err(error);
        }
        let sticky = self.sticky.lock().unwrap().clone();
        match sticky {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Persistence for FlakyBackend {
    async fn insert(&self, table: &str, owner_id: &str, row: Value) -> Result<Value, PersistenceError> {
        self.enter_write().await?;
        self.store.insert(table, owner_id, row).await
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Value) -> Result<Value, PersistenceError> {
        self.enter_write().await?;
        self.store.update(table, id, owner_id, patch).await
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), PersistenceError> {
        self.enter_write().await?;
        self.store.delete(table, id, owner_id).await
    }

    async fn list(&self, table: &str, owner_id: &str, query: &ListQuery) -> Result<Vec<Value>, PersistenceError> {
        self.enter()?;
        self.store.list(table, owner_id, query).await
    }
}

#[async_trait]
impl ChangeSource for FlakyBackend {
    async fn subscribe(&self, owner_id: &str, table: &str) -> Result<ChangeSubscription, PersistenceError> {
        ChangeSource::subscribe(&self.store, owner_id, table).await
    }
}
