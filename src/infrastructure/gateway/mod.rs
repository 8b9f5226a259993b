// Remote Data Gateway - the only layer that talks to the hosted backend
// Repositories speak this contract; concrete backends are selected by configuration

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub mod changes;
pub mod filter;
pub mod memory;
pub mod sqlite;

pub use changes::ChangeFeed;
pub use filter::{Direction, FilterSpec, OrderBy, Predicate};
pub use memory::{Fault, InMemoryGateway};
pub use sqlite::SqliteGateway;

/// A row is a JSON object keyed by column name.
pub type Row = serde_json::Map<String, Value>;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Tables exposed by the hosted backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Posts,
    Comments,
    Groups,
    GroupMembers,
    Users,
    PostLikes,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Posts,
        Table::Comments,
        Table::Groups,
        Table::GroupMembers,
        Table::Users,
        Table::PostLikes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Posts => "posts",
            Table::Comments => "comments",
            Table::Groups => "groups",
            Table::GroupMembers => "group_members",
            Table::Users => "users",
            Table::PostLikes => "post_likes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Insert,
    /// Merge the payload's fields into the row with this id.
    Update { id: String },
    /// Add `by` to a numeric column in one atomic step, floored at zero.
    /// A missing or null column counts as zero.
    Increment { id: String, column: String, by: i64 },
    Delete { id: String },
}

/// Failure reported by a gateway backend, carried unchanged into `AppError`.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    Backend(String),
    NotFound { table: Table, id: String },
    Constraint(String),
    Storage(String),
    Serialization(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Backend(msg) => write!(f, "Backend error: {}", msg),
            GatewayError::NotFound { table, id } => write!(f, "Row {} not found in {}", id, table),
            GatewayError::Constraint(msg) => write!(f, "Constraint violation: {}", msg),
            GatewayError::Storage(msg) => write!(f, "Storage error: {}", msg),
            GatewayError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

/// An uploaded file as handed over by the composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Notification pushed to subscribers after a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row: Row,
}

pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Handle returned by `Gateway::subscribe`. Delivery stops on `unsubscribe` or drop.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Gateway contract over the hosted backend's query, mutation, storage and realtime API
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn query(&self, table: Table, filter: &FilterSpec) -> GatewayResult<Vec<Row>>;

    async fn mutate(&self, table: Table, op: MutationOp, payload: Row) -> GatewayResult<Row>;

    /// Store `blob` under `bucket/path` and return its publicly resolvable URL.
    async fn upload_file(&self, bucket: &str, path: &str, blob: &Blob) -> GatewayResult<String>;

    /// Must be called from within a tokio runtime.
    fn subscribe(&self, table: Table, filter: FilterSpec, on_change: ChangeCallback) -> Subscription;
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// Rewrite RFC 3339 timestamps as UTC with fixed microsecond precision,
/// so that stored timestamps order the same as strings and as instants.
pub(crate) fn normalize_timestamps(row: &mut Row) {
    for column in TIMESTAMP_COLUMNS {
        let normalized = match row.get(column) {
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true)),
            _ => None,
        };
        if let Some(normalized) = normalized {
            row.insert(column.to_string(), Value::String(normalized));
        }
    }
}

/// Apply an increment to a stored row's numeric column.
pub(crate) fn increment_column(mut existing: Row, column: &str, by: i64) -> Row {
    let current = existing.get(column).and_then(Value::as_i64).unwrap_or(0);
    existing.insert(column.to_string(), Value::from((current + by).max(0)));
    existing.insert("updated_at".to_string(), Value::String(now_rfc3339()));
    existing
}

/// Fill in the server-assigned columns of a row about to be inserted.
pub(crate) fn stamp_insert(mut payload: Row) -> Row {
    let now = now_rfc3339();
    let has_id = matches!(payload.get("id"), Some(Value::String(s)) if !s.is_empty());
    if !has_id {
        payload.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    if !payload.get("created_at").map(|v| !v.is_null()).unwrap_or(false) {
        payload.insert("created_at".to_string(), Value::String(now.clone()));
    }
    if !payload.get("updated_at").map(|v| !v.is_null()).unwrap_or(false) {
        payload.insert("updated_at".to_string(), Value::String(now));
    }
    normalize_timestamps(&mut payload);
    payload
}

/// Merge an update payload into a stored row. `id` and `created_at` are immutable.
pub(crate) fn merge_update(mut existing: Row, payload: Row) -> Row {
    for (column, value) in payload {
        if column == "id" || column == "created_at" {
            continue;
        }
        existing.insert(column, value);
    }
    existing.insert("updated_at".to_string(), Value::String(now_rfc3339()));
    existing
}

pub(crate) fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

pub(crate) fn public_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_stamp_insert_assigns_server_columns() {
        let stamped = stamp_insert(row(json!({"name": "Youth"})));
        assert!(row_id(&stamped).is_some());
        assert!(stamped.get("created_at").and_then(Value::as_str).is_some());
        assert_eq!(stamped.get("created_at"), stamped.get("updated_at"));
    }

    #[test]
    fn test_stamp_insert_keeps_explicit_id() {
        let stamped = stamp_insert(row(json!({"id": "p1:u1"})));
        assert_eq!(row_id(&stamped), Some("p1:u1"));
    }

    #[test]
    fn test_merge_update_protects_identity() {
        let existing = row(json!({"id": "a", "created_at": "t0", "likes_count": 1}));
        let merged = merge_update(existing, row(json!({"id": "b", "created_at": "t9", "likes_count": 2})));
        assert_eq!(merged["id"], json!("a"));
        assert_eq!(merged["created_at"], json!("t0"));
        assert_eq!(merged["likes_count"], json!(2));
    }

    #[test]
    fn test_stamp_insert_normalizes_timestamps() {
        let stamped = stamp_insert(row(json!({
            "created_at": "2024-01-01T02:00:00.5+02:00",
            "updated_at": "2024-01-01T00:00:00Z",
        })));
        assert_eq!(stamped["created_at"], json!("2024-01-01T00:00:00.500000Z"));
        assert_eq!(stamped["updated_at"], json!("2024-01-01T00:00:00.000000Z"));
        assert!(stamped["updated_at"].as_str() < stamped["created_at"].as_str());
    }

    #[test]
    fn test_increment_column_floors_at_zero() {
        let bumped = increment_column(row(json!({"id": "p1"})), "likes_count", 1);
        assert_eq!(bumped["likes_count"], json!(1));
        let lowered = increment_column(bumped, "likes_count", -3);
        assert_eq!(lowered["likes_count"], json!(0));
    }

    #[test]
    fn test_public_url_joins_segments() {
        assert_eq!(
            public_url("https://cdn.example.org/storage/", "media", "u1/a.png"),
            "https://cdn.example.org/storage/media/u1/a.png"
        );
    }
}
