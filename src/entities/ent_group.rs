// Group entity and its membership rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Entity;
use crate::infrastructure::gateway::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Awaiting admin approval; every newly created group starts here.
    #[default]
    Pending,
    Approved,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Pending => "pending",
            GroupStatus::Approved => "approved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub leader_id: Option<String>,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
}

impl Entity for Group {
    fn table() -> Table {
        Table::Groups
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub status: GroupStatus,
}

impl Entity for GroupMember {
    fn table() -> Table {
        Table::GroupMembers
    }
}

/// Input to `GroupRepository::create_group`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl NewGroup {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_row_defaults() {
        let group = Group::from_row(
            json!({"id": "g1", "name": "Youth", "created_at": "2024-02-02T08:00:00Z"})
                .as_object()
                .cloned()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(group.status, GroupStatus::Pending);
        assert_eq!(group.member_count, 0);
        assert!(!group.is_private);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(GroupStatus::Approved).unwrap(), json!("approved"));
        assert_eq!(serde_json::to_value(MemberRole::Admin).unwrap(), json!("admin"));
        assert_eq!(GroupStatus::Pending.as_str(), "pending");
    }
}
