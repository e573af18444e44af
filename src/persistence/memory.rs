// file: src/persistence/memory.rs
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::feed::{ChangeFeed, ChangeSubscription};
use super::{merge_patch, stamp_new_row, ChangeSource, Persistence};
use crate::error::PersistenceError;
use crate::models::{ListQuery, RowChange};
use crate::sync::normalizer::row_id;

#[derive(Debug, Clone)]
struct StoredRow {
    owner_id: String,
    row: Value,
}

/// In-process data store with a change feed. Every write is published to the
/// owner's subscribers, including the session that made it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, Vec<StoredRow>>>>,
    feed: ChangeFeed,
    id_prefix: Option<String>,
    next_id: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that assigns `<prefix>-1`, `<prefix>-2`, ... instead of UUIDs.
    pub fn with_sequential_ids(prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    fn assign_id(&self) -> String {
        match &self.id_prefix {
            Some(prefix) => format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            None => uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn row_count(&self, table: &str, owner_id: &str) -> usize {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(table)
            .map(|rows| rows.iter().filter(|stored| stored.owner_id == owner_id).count())
            .unwrap_or(0)
    }

    pub fn get(&self, table: &str, id: &str) -> Option<Value> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(table)?
            .iter()
            .find(|stored| row_id(&stored.row) == Some(id))
            .map(|stored| stored.row.clone())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn insert(&self, table: &str, owner_id: &str, row: Value) -> Result<Value, PersistenceError> {
        let id = self.assign_id();
        let row = stamp_new_row(row, &id, owner_id)?;
        {
            let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
            tables.entry(table.to_string()).or_default().push(StoredRow {
                owner_id: owner_id.to_string(),
                row: row.clone(),
            });
        }
        debug!("[Memory] Inserted {} into {}", id, table);
        self.feed.publish(owner_id, table, RowChange::insert(row.clone()));
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Value) -> Result<Value, PersistenceError> {
        let (old, new) = {
            let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
            let stored = tables
                .get_mut(table)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|stored| stored.owner_id == owner_id && row_id(&stored.row) == Some(id))
                })
                .ok_or_else(|| PersistenceError::not_found(format!("{} {}", table, id)))?;
            let old = stored.row.clone();
            merge_patch(&mut stored.row, &patch)?;
            (old, stored.row.clone())
        };
        self.feed.publish(owner_id, table, RowChange::update(Some(old), new.clone()));
        Ok(new)
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), PersistenceError> {
        let removed = {
            let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
            tables.get_mut(table).and_then(|rows| {
                let index = rows
                    .iter()
                    .position(|stored| stored.owner_id == owner_id && row_id(&stored.row) == Some(id))?;
                Some(rows.remove(index))
            })
        };
        // Deleting a missing row is not an error, matching SQL semantics
        if let Some(stored) = removed {
            self.feed.publish(owner_id, table, RowChange::delete(stored.row));
        }
        Ok(())
    }

    async fn list(&self, table: &str, owner_id: &str, query: &ListQuery) -> Result<Vec<Value>, PersistenceError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|stored| stored.owner_id == owner_id)
                    .map(|stored| stored.row.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(query.apply(rows))
    }
}

#[async_trait]
impl ChangeSource for MemoryStore {
    async fn subscribe(&self, owner_id: &str, table: &str) -> Result<ChangeSubscription, PersistenceError> {
        ChangeSource::subscribe(&self.feed, owner_id, table).await
    }
}
