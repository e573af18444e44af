// file: src/models/change.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    #[serde(alias = "insert")]
    Insert,
    #[serde(alias = "update")]
    Update,
    #[serde(alias = "delete")]
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// A raw push notification about one persisted row, as the data store sends it.
///
/// `old` is present for updates and deletes (at least the primary key), `new`
/// for inserts and updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "eventType", alias = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default)]
    pub new: Option<Value>,
}

impl RowChange {
    pub fn insert(row: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            old: None,
            new: Some(row),
        }
    }

    pub fn update(old: Option<Value>, new: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            old,
            new: Some(new),
        }
    }

    pub fn delete(old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            old: Some(old),
            new: None,
        }
    }
}

/// Canonical form of a [`RowChange`] once the row has been mapped to an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<E> {
    Insert(E),
    Update(E),
    Delete(String),
}

impl<E> ChangeEvent<E> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete(_) => ChangeKind::Delete,
        }
    }
}
