#![allow(unused_imports)]
// file: src/models/mod.rs

pub mod change;
pub mod pool_task;
pub mod query;
pub mod schedule_item;

// Re-export so callers can write `use openplan::models::PoolTask`.
pub use change::{ChangeEvent, ChangeKind, RowChange};
pub use pool_task::{PoolTask, PoolTaskDraft, PoolTaskPatch};
pub use query::{Filter, ListQuery, OrderBy};
pub use schedule_item::{ScheduleItem, ScheduleItemDraft, ScheduleItemPatch};
