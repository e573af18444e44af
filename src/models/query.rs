// file: src/models/query.rs
use serde_json::Value;
use std::cmp::Ordering;

/// Equality filter on one row field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

/// Filters and ordering for a `list` call. Owner scoping is applied by the
/// backend and never appears here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter_eq<S: Into<String>>(mut self, field: S, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by<S: Into<String>>(mut self, field: S, ascending: bool) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            ascending,
        });
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|filter| row.get(&filter.field) == Some(&filter.value))
    }

    /// Stable sort of `rows` by the `order_by` clauses, in order.
    pub fn sort(&self, rows: &mut [Value]) {
        if self.order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for clause in &self.order_by {
                let ordering = compare_json(
                    a.get(&clause.field).unwrap_or(&Value::Null),
                    b.get(&clause.field).unwrap_or(&Value::Null),
                );
                let ordering = if clause.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    /// Filter then sort, the way a backend without a query planner answers `list`.
    pub fn apply(&self, rows: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = rows.into_iter().filter(|row| self.matches(row)).collect();
        self.sort(&mut matched);
        matched
    }
}

// Nulls first, then booleans, numbers, strings. Dates and times are ISO
// strings, so lexical order is chronological.
fn compare_json(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
