// Author projection - read-only view of the users table embedded in posts and comments

use serde::{Deserialize, Serialize};

use super::Entity;
use crate::infrastructure::auth::CurrentUser;
use crate::infrastructure::gateway::Table;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Author {
    /// Projection used when the author's user row cannot be found.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: "Unknown".to_string(),
            avatar_url: None,
        }
    }
}

impl From<&CurrentUser> for Author {
    fn from(user: &CurrentUser) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRow {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Entity for UserRow {
    fn table() -> Table {
        Table::Users
    }
}

impl From<UserRow> for Author {
    fn from(row: UserRow) -> Self {
        Self {
            display_name: row.full_name.unwrap_or_else(|| "Unknown".to_string()),
            id: row.id,
            avatar_url: row.avatar_url,
        }
    }
}
