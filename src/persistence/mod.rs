// file: src/persistence/mod.rs
//
// Row-level interfaces to the data store. Rows are JSON objects so one backend
// serves every entity kind; entity mapping happens in the sync layer.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::PersistenceError;
use crate::models::ListQuery;

pub mod feed;
pub mod memory;
pub mod rest;
pub mod sqlite;

pub use feed::{ChangeFeed, ChangeSubscription};
pub use memory::MemoryStore;
pub use rest::RestPersistence;
pub use sqlite::SqliteStore;

/// Column holding the owner identifier on every row.
pub const OWNER_FIELD: &str = "user_id";

/// Persistence API. Every call is scoped to one owner.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert `row` and return the stored row, including its server-assigned id.
    async fn insert(&self, table: &str, owner_id: &str, row: Value) -> Result<Value, PersistenceError>;

    /// Merge `patch` into the row and return the stored row.
    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Value) -> Result<Value, PersistenceError>;

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), PersistenceError>;

    async fn list(&self, table: &str, owner_id: &str, query: &ListQuery) -> Result<Vec<Value>, PersistenceError>;
}

/// Change Stream API: push notifications for one owner's rows in one table.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn subscribe(&self, owner_id: &str, table: &str) -> Result<ChangeSubscription, PersistenceError>;
}

/// The pair of collaborators an engine talks to.
#[derive(Clone)]
pub struct Backend {
    pub persistence: Arc<dyn Persistence>,
    pub changes: Arc<dyn ChangeSource>,
}

impl Backend {
    pub fn new(persistence: Arc<dyn Persistence>, changes: Arc<dyn ChangeSource>) -> Self {
        Self { persistence, changes }
    }

    /// Backend where one store provides both persistence and the change stream.
    pub fn local<S>(store: Arc<S>) -> Self
    where
        S: Persistence + ChangeSource + 'static,
    {
        Self {
            persistence: store.clone(),
            changes: store,
        }
    }
}

/// Copy `patch`'s fields onto `row`. Identity columns are never overwritten.
pub(crate) fn merge_patch(row: &mut Value, patch: &Value) -> Result<(), PersistenceError> {
    let (Value::Object(fields), Value::Object(changes)) = (row, patch) else {
        return Err(PersistenceError::validation("rows and patches must be JSON objects"));
    };
    for (key, value) in changes {
        if key == "id" || key == OWNER_FIELD {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }
    Ok(())
}

/// Prepare a row for insertion: assign `id` and stamp the owner.
pub(crate) fn stamp_new_row(mut row: Value, id: &str, owner_id: &str) -> Result<Value, PersistenceError> {
    let Value::Object(fields) = &mut row else {
        return Err(PersistenceError::validation("rows must be JSON objects"));
    };
    fields.insert("id".to_string(), Value::String(id.to_string()));
    fields.insert(OWNER_FIELD.to_string(), Value::String(owner_id.to_string()));
    Ok(row)
}
