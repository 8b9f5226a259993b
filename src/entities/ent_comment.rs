// Comment entity - flat rows in storage, threaded by the assembler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Author, Entity};
use crate::infrastructure::gateway::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author: Author,
    pub content: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Built by the thread assembler, never stored.
    #[serde(default)]
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for CommentRow {
    fn table() -> Table {
        Table::Comments
    }
}

impl CommentRow {
    pub fn into_comment(self, author: Author) -> Comment {
        Comment {
            id: self.id,
            post_id: self.post_id,
            author,
            content: self.content,
            parent_id: self.parent_id,
            created_at: self.created_at,
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewComment {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl NewComment {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            parent_id: None,
        }
    }

    pub fn reply_to(content: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            parent_id: Some(parent_id.into()),
        }
    }
}
