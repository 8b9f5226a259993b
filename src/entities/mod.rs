// Community entities - value objects copied into and out of the query cache

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::AppResult;
use crate::infrastructure::gateway::{Row, Table};

pub mod ent_comment;
pub mod ent_group;
pub mod ent_post;
pub mod ent_user;

pub use ent_comment::{Comment, CommentRow, NewComment};
pub use ent_group::{Group, GroupMember, GroupStatus, MemberRole, NewGroup};
pub use ent_post::{MediaItem, MediaKind, NewPost, Post, PostRow};
pub use ent_user::{Author, UserRow};

/// A row shape stored in one gateway table
pub trait Entity: DeserializeOwned + Send + Sync {
    fn table() -> Table;

    fn table_str() -> &'static str {
        Self::table().as_str()
    }

    fn from_row(row: Row) -> AppResult<Self> {
        Ok(serde_json::from_value(Value::Object(row))?)
    }

    fn from_rows(rows: Vec<Row>) -> AppResult<Vec<Self>> {
        rows.into_iter().map(Self::from_row).collect()
    }
}

/// Build a gateway payload from a `json!` object literal.
pub fn payload(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        _ => Row::new(),
    }
}
