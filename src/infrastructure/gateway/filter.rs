// Declarative filter specification handed to `Gateway::query`

use serde_json::Value;
use std::cmp::Ordering;

use super::Row;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    /// Matches a null or missing column.
    IsNull(String),
    In(String, Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
    pub nulls_last: bool,
    /// Value substituted for null/missing before comparing.
    pub coalesce: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl FilterSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(column.to_string(), value.into()));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.predicates.push(Predicate::IsNull(column.to_string()));
        self
    }

    pub fn in_list<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.predicates.push(Predicate::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction, nulls_last: bool) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            direction,
            nulls_last,
            coalesce: None,
        });
        self
    }

    pub fn order_by_or(mut self, column: &str, direction: Direction, default: impl Into<Value>) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            direction,
            nulls_last: true,
            coalesce: Some(default.into()),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` satisfies every predicate. Ordering and limit are ignored.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates.iter().all(|predicate| match predicate {
            Predicate::Eq(column, expected) => row.get(column) == Some(expected),
            Predicate::IsNull(column) => row.get(column).map(Value::is_null).unwrap_or(true),
            Predicate::In(column, values) => row
                .get(column)
                .map(|v| !v.is_null() && values.contains(v))
                .unwrap_or(false),
        })
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for order in &self.order {
            let left = effective(a.get(&order.column), order.coalesce.as_ref());
            let right = effective(b.get(&order.column), order.coalesce.as_ref());
            let ordering = compare_values(left, right, order.direction, order.nulls_last);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Filter, stable-sort and truncate an in-memory row set.
    pub fn apply(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
        let mut selected: Vec<Row> = rows.into_iter().filter(|row| self.matches(row)).collect();
        if !self.order.is_empty() {
            selected.sort_by(|a, b| self.compare(a, b));
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

fn effective<'a>(value: Option<&'a Value>, coalesce: Option<&'a Value>) -> Option<&'a Value> {
    match value {
        Some(v) if !v.is_null() => Some(v),
        _ => coalesce,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two column values. Nulls sort last (or first) regardless of direction.
pub fn compare_values(
    a: Option<&Value>,
    b: Option<&Value>,
    direction: Direction,
    nulls_last: bool,
) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return if nulls_last { Ordering::Greater } else { Ordering::Less },
        (Some(_), None) => return if nulls_last { Ordering::Less } else { Ordering::Greater },
        (Some(a), Some(b)) => (a, b),
    };

    let ordering = match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (x, y) if type_rank(x) != type_rank(y) => type_rank(x).cmp(&type_rank(y)),
        (x, y) => x.to_string().cmp(&y.to_string()),
    };

    match direction {
        Direction::Ascending => ordering,
        Direction::Descending => ordering.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values.into_iter().map(|v| v.as_object().cloned().unwrap()).collect()
    }

    fn ids(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_eq_and_is_null() {
        let data = rows(vec![
            json!({"id": "a", "group_id": "g1"}),
            json!({"id": "b", "group_id": null}),
            json!({"id": "c"}),
        ]);

        let in_group = FilterSpec::all().eq("group_id", "g1").apply(data.clone());
        assert_eq!(ids(&in_group), vec!["a"]);

        let public = FilterSpec::all().is_null("group_id").apply(data);
        assert_eq!(ids(&public), vec!["b", "c"]);
    }

    #[test]
    fn test_in_list_skips_nulls() {
        let data = rows(vec![
            json!({"id": "u1"}),
            json!({"id": "u2"}),
            json!({"id": "u3"}),
        ]);
        let picked = FilterSpec::all().in_list("id", ["u3", "u1"]).apply(data);
        assert_eq!(ids(&picked), vec!["u1", "u3"]);
    }

    #[test]
    fn test_descending_with_nulls_last() {
        let data = rows(vec![
            json!({"id": "a", "member_count": null}),
            json!({"id": "b", "member_count": 4}),
            json!({"id": "c", "member_count": 12}),
        ]);
        let sorted = FilterSpec::all()
            .order_by("member_count", Direction::Descending, true)
            .apply(data);
        assert_eq!(ids(&sorted), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_coalesced_order_treats_missing_as_default() {
        let data = rows(vec![
            json!({"id": "old", "is_pinned": false, "created_at": "2024-01-01T00:00:01Z"}),
            json!({"id": "unset", "created_at": "2024-01-01T00:00:02Z"}),
            json!({"id": "pinned", "is_pinned": true, "created_at": "2024-01-01T00:00:00Z"}),
        ]);
        let sorted = FilterSpec::all()
            .order_by_or("is_pinned", Direction::Descending, false)
            .order_by("created_at", Direction::Descending, true)
            .apply(data);
        assert_eq!(ids(&sorted), vec!["pinned", "unset", "old"]);
    }

    #[test]
    fn test_limit_applies_after_sort() {
        let data = rows(vec![
            json!({"id": "a", "created_at": "1"}),
            json!({"id": "b", "created_at": "3"}),
            json!({"id": "c", "created_at": "2"}),
        ]);
        let top = FilterSpec::all()
            .order_by("created_at", Direction::Descending, true)
            .limit(2)
            .apply(data);
        assert_eq!(ids(&top), vec!["b", "c"]);
    }
}
