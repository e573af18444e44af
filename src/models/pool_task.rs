// file: src/models/pool_task.rs
use serde::{Deserialize, Serialize};

use crate::models::ListQuery;
use crate::sync::mapping::{Positioned, SyncEntity};

/// An unscheduled task waiting in the pool, ordered by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolTask {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    pub position: i64,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolTaskDraft {
    pub title: String,
    pub notes: Option<String>,
    pub duration_minutes: Option<i32>,
}

impl PoolTaskDraft {
    pub fn new<S: Into<String>>(title: S) -> Self {
        Self {
            title: title.into(),
            notes: None,
            duration_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolTaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl PoolTaskPatch {
    pub fn title<S: Into<String>>(title: S) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn completed(done: bool) -> Self {
        Self {
            completed: Some(done),
            ..Self::default()
        }
    }
}

impl SyncEntity for PoolTask {
    type Draft = PoolTaskDraft;
    type Patch = PoolTaskPatch;
    type SortKey = i64;

    const TABLE: &'static str = "pool_tasks";
    const LABEL: &'static str = "Task";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }

    fn sort_key(&self) -> i64 {
        self.position
    }

    /// New tasks go to the bottom of the pool: one past the current maximum.
    fn from_draft(draft: PoolTaskDraft, id: String, owner_id: &str, current: &[Self]) -> Self {
        let position = current
            .iter()
            .map(|task| task.position)
            .max()
            .map_or(0, |max| max.saturating_add(1));

        Self {
            id,
            user_id: owner_id.to_string(),
            title: draft.title,
            notes: draft.notes,
            duration_minutes: draft.duration_minutes,
            position,
            completed: false,
        }
    }

    fn apply_patch(&self, patch: &PoolTaskPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(notes) = &patch.notes {
            next.notes = Some(notes.clone());
        }
        if let Some(minutes) = patch.duration_minutes {
            next.duration_minutes = Some(minutes);
        }
        if let Some(position) = patch.position {
            next.position = position;
        }
        if let Some(completed) = patch.completed {
            next.completed = completed;
        }
        next
    }

    fn default_query() -> ListQuery {
        ListQuery::new().order_by("position", true)
    }
}

impl Positioned for PoolTask {
    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}
