//! Entity mapping: everything the generic engine needs to know about one
//! entity kind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use crate::error::NormalizeError;
use crate::models::ListQuery;

/// Prefix of client-assigned identifiers that the server has not confirmed yet.
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// A domain record the engine can keep in [`LocalStore`](super::LocalStore),
/// persist, and rebuild from change-stream rows.
pub trait SyncEntity:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Caller-supplied fields for `create`.
    type Draft: Send;
    /// Partial update for `update`; serializes to only the fields it sets.
    type Patch: Clone + Debug + Serialize + Send + Sync;
    type SortKey: Ord;

    /// Table (and change-stream channel) name in the data store.
    const TABLE: &'static str;
    /// Human-readable kind name for notifications, e.g. "Task".
    const LABEL: &'static str;

    fn id(&self) -> &str;

    fn owner_id(&self) -> &str;

    fn sort_key(&self) -> Self::SortKey;

    /// Build the optimistic entity for a draft. `current` is the latest
    /// snapshot, for kinds whose sort key depends on their siblings.
    fn from_draft(draft: Self::Draft, id: String, owner_id: &str, current: &[Self]) -> Self;

    fn apply_patch(&self, patch: &Self::Patch) -> Self;

    /// Ordering used for the initial load.
    fn default_query() -> ListQuery;

    fn from_row(row: Value) -> Result<Self, NormalizeError> {
        if row.get("id").and_then(Value::as_str).is_none() {
            return Err(NormalizeError::MissingId);
        }
        Ok(serde_json::from_value(row)?)
    }

    fn to_row(&self) -> Result<Value, NormalizeError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Row sent with `insert`: the server assigns the durable id.
    fn insert_row(&self) -> Result<Value, NormalizeError> {
        let mut row = self.to_row()?;
        if let Value::Object(fields) = &mut row {
            fields.remove("id");
        }
        Ok(row)
    }

    fn patch_row(patch: &Self::Patch) -> Result<Value, NormalizeError> {
        Ok(serde_json::to_value(patch)?)
    }
}

/// Kinds ordered by an integer position the user controls (pool tasks).
pub trait Positioned: SyncEntity {
    const POSITION_FIELD: &'static str = "position";

    fn position(&self) -> i64;

    fn set_position(&mut self, position: i64);
}

/// Re-establish the ordering invariant. Stable, so ties keep their order.
pub fn sort_entities<E: SyncEntity>(items: &mut [E]) {
    items.sort_by_key(|item| item.sort_key());
}

pub fn position_of<E: SyncEntity>(items: &[E], id: &str) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}
