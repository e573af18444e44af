//! Turns provider row notifications into canonical [`ChangeEvent`]s.

use serde_json::Value;

use super::mapping::SyncEntity;
use crate::error::NormalizeError;
use crate::models::{ChangeEvent, ChangeKind, RowChange};

pub fn normalize_change<E: SyncEntity>(change: RowChange) -> Result<ChangeEvent<E>, NormalizeError> {
    match change.kind {
        ChangeKind::Insert => {
            let row = change.new.ok_or(NormalizeError::MissingPayload(ChangeKind::Insert))?;
            Ok(ChangeEvent::Insert(E::from_row(row)?))
        }
        ChangeKind::Update => {
            let row = change.new.ok_or(NormalizeError::MissingPayload(ChangeKind::Update))?;
            Ok(ChangeEvent::Update(E::from_row(row)?))
        }
        ChangeKind::Delete => {
            // Deletes only guarantee the primary key in `old`
            let old = change.old.ok_or(NormalizeError::MissingPayload(ChangeKind::Delete))?;
            let id = row_id(&old).ok_or(NormalizeError::MissingId)?;
            Ok(ChangeEvent::Delete(id.to_string()))
        }
    }
}

pub fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PoolTask;
    use serde_json::json;

    fn task_row(id: &str, position: i64) -> Value {
        json!({
            "id": id,
            "user_id": "owner-1",
            "title": "Write report",
            "position": position,
            "completed": false
        })
    }

    #[test]
    fn test_insert_normalizes_to_entity() {
        let event = normalize_change::<PoolTask>(RowChange::insert(task_row("t-1", 4))).unwrap();
        match event {
            ChangeEvent::Insert(task) => {
                assert_eq!(task.id, "t-1");
                assert_eq!(task.position, 4);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_delete_needs_only_the_key() {
        let event = normalize_change::<PoolTask>(RowChange::delete(json!({ "id": "t-9" }))).unwrap();
        assert_eq!(event, ChangeEvent::Delete("t-9".to_string()));
    }

    #[test]
    fn test_update_without_new_row_is_rejected() {
        let change = RowChange {
            kind: ChangeKind::Update,
            old: Some(json!({ "id": "t-1" })),
            new: None,
        };
        let err = normalize_change::<PoolTask>(change).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingPayload(ChangeKind::Update)));
    }

    #[test]
    fn test_malformed_row_is_rejected() {
        let change = RowChange::insert(json!({ "id": "t-1", "position": "first" }));
        assert!(matches!(
            normalize_change::<PoolTask>(change),
            Err(NormalizeError::Decode(_))
        ));
    }
}
