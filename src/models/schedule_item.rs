// file: src/models/schedule_item.rs
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::ListQuery;
use crate::sync::mapping::SyncEntity;

/// A block of time placed on the calendar grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl ScheduleItem {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// May fall on the next day for blocks that run past midnight.
    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    pub fn overlaps(&self, other: &ScheduleItem) -> bool {
        self.starts_at() < other.ends_at() && other.starts_at() < self.ends_at()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleItemDraft {
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
    pub notes: Option<String>,
    pub color: Option<String>,
}

impl ScheduleItemDraft {
    pub fn new<S: Into<String>>(title: S, date: NaiveDate, start_time: NaiveTime) -> Self {
        Self {
            title: title.into(),
            date,
            start_time,
            duration_minutes: 30,
            notes: None,
            color: None,
        }
    }

    pub fn with_duration(mut self, minutes: i32) -> Self {
        self.duration_minutes = minutes;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl ScheduleItemPatch {
    pub fn title<S: Into<String>>(title: S) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Move the item to another slot, as a drag on the calendar grid does.
    pub fn reschedule(date: NaiveDate, start_time: NaiveTime) -> Self {
        Self {
            date: Some(date),
            start_time: Some(start_time),
            ..Self::default()
        }
    }
}

impl SyncEntity for ScheduleItem {
    type Draft = ScheduleItemDraft;
    type Patch = ScheduleItemPatch;
    type SortKey = (NaiveDate, NaiveTime);

    const TABLE: &'static str = "schedule_items";
    const LABEL: &'static str = "Schedule item";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }

    fn sort_key(&self) -> Self::SortKey {
        (self.date, self.start_time)
    }

    fn from_draft(draft: ScheduleItemDraft, id: String, owner_id: &str, _current: &[Self]) -> Self {
        Self {
            id,
            user_id: owner_id.to_string(),
            title: draft.title,
            date: draft.date,
            start_time: draft.start_time,
            duration_minutes: draft.duration_minutes,
            notes: draft.notes,
            color: draft.color,
            completed: false,
        }
    }

    fn apply_patch(&self, patch: &ScheduleItemPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(date) = patch.date {
            next.date = date;
        }
        if let Some(start_time) = patch.start_time {
            next.start_time = start_time;
        }
        if let Some(minutes) = patch.duration_minutes {
            next.duration_minutes = minutes;
        }
        if let Some(notes) = &patch.notes {
            next.notes = Some(notes.clone());
        }
        if let Some(color) = &patch.color {
            next.color = Some(color.clone());
        }
        if let Some(completed) = patch.completed {
            next.completed = completed;
        }
        next
    }

    fn default_query() -> ListQuery {
        ListQuery::new()
            .order_by("date", true)
            .order_by("start_time", true)
    }
}
