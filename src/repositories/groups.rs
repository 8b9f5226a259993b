// Group repository - group directory and group creation with leader membership

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{MutationTracker, RepositoryOptions};
use crate::entities::{payload, Entity, Group, GroupStatus, MemberRole, NewGroup};
use crate::error::{AppError, AppResult};
use crate::infrastructure::auth::{require_actor, AuthProvider};
use crate::infrastructure::cache::{CacheKey, QueryCache, QueryState};
use crate::infrastructure::gateway::{Direction, FilterSpec, Gateway, MutationOp, Table};

pub const GROUPS_FAMILY: &str = "groups";
pub const ALL_GROUPS_SCOPE: &str = "all";

#[derive(Clone)]
pub struct GroupRepository {
    gateway: Arc<dyn Gateway>,
    auth: Arc<dyn AuthProvider>,
    cache: Arc<QueryCache<Vec<Group>>>,
    create_tracker: Arc<MutationTracker>,
    options: RepositoryOptions,
}

impl GroupRepository {
    pub fn new(gateway: Arc<dyn Gateway>, auth: Arc<dyn AuthProvider>, options: RepositoryOptions) -> Self {
        Self {
            cache: Arc::new(QueryCache::new(options.cache_capacity)),
            create_tracker: Arc::new(MutationTracker::default()),
            gateway,
            auth,
            options,
        }
    }

    pub fn cache_key() -> CacheKey {
        CacheKey::new(GROUPS_FAMILY, ALL_GROUPS_SCOPE)
    }

    /// Every group, largest first.
    #[instrument(skip(self))]
    pub async fn list_groups(&self) -> AppResult<Vec<Group>> {
        self.cache
            .read_through(&Self::cache_key(), || self.fetch_groups())
            .await
    }

    async fn fetch_groups(&self) -> AppResult<Vec<Group>> {
        let filter = FilterSpec::all().order_by_or("member_count", Direction::Descending, 0);
        let rows = self
            .gateway
            .query(Table::Groups, &filter)
            .await
            .map_err(AppError::upstream("list_groups"))?;
        let groups = Group::from_rows(rows)?;
        debug!("Fetched {} groups", groups.len());
        Ok(groups)
    }

    pub fn groups_state(&self) -> QueryState<Vec<Group>> {
        self.cache.state(&Self::cache_key())
    }

    pub fn create_group_pending(&self) -> bool {
        self.create_tracker.is_pending()
    }

    /// Create a group awaiting approval with the actor as its leader, then
    /// enrol the actor as an approved admin.
    ///
    /// The group row is the result: if the membership insert fails it is
    /// logged and the created group is still returned. `member_count` starts
    /// at zero and only counts the leader once the membership exists.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_group(&self, input: NewGroup) -> AppResult<Group> {
        let _pending = self.create_tracker.begin();
        let actor = require_actor(self.auth.as_ref()).await?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("Group name must not be blank"));
        }

        let row = self
            .gateway
            .mutate(
                Table::Groups,
                MutationOp::Insert,
                payload(json!({
                    "name": name,
                    "description": input.description,
                    "is_private": input.is_private,
                    "image_url": input.image_url,
                    "leader_id": actor.id,
                    "member_count": 0,
                    "status": GroupStatus::Pending.as_str(),
                })),
            )
            .await
            .map_err(AppError::upstream("create_group"))?;
        let mut group = Group::from_row(row)?;

        let membership = self
            .gateway
            .mutate(
                Table::GroupMembers,
                MutationOp::Insert,
                payload(json!({
                    "group_id": group.id,
                    "user_id": actor.id,
                    "role": MemberRole::Admin,
                    "status": GroupStatus::Approved,
                })),
            )
            .await;
        match membership {
            Ok(_) => group = self.count_leader(group).await,
            Err(err) => error!("Group {} created but leader membership failed: {}", group.id, err),
        }

        info!("Created group {} led by {}", group.id, actor.id);
        self.invalidate();
        Ok(group)
    }

    async fn count_leader(&self, group: Group) -> Group {
        let bumped = self
            .gateway
            .mutate(
                Table::Groups,
                MutationOp::Increment {
                    id: group.id.clone(),
                    column: "member_count".to_string(),
                    by: 1,
                },
                payload(json!({})),
            )
            .await;
        match bumped.map_err(AppError::upstream("count_group_leader")).and_then(Group::from_row) {
            Ok(counted) => counted,
            Err(err) => {
                warn!("Leader of group {} enrolled but not counted: {}", group.id, err);
                group
            }
        }
    }

    /// Mark the group directory stale and re-fetch it in the background when enabled.
    pub fn invalidate(&self) {
        if !self.cache.invalidate(&Self::cache_key()) || !self.options.refetch_on_invalidate {
            return;
        }

        let repository = self.clone();
        tokio::spawn(async move {
            if let Err(err) = repository.list_groups().await {
                warn!("Background refresh of groups failed: {}", err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::auth::{CurrentUser, StaticAuth};
    use crate::infrastructure::gateway::{Fault, InMemoryGateway};

    fn signed_in() -> Arc<StaticAuth> {
        Arc::new(StaticAuth::signed_in(CurrentUser::new("u1", "Ada")))
    }

    #[tokio::test]
    async fn test_groups_ordered_by_member_count() {
        let memory = InMemoryGateway::new("mem://storage");
        memory
            .seed(
                Table::Groups,
                vec![
                    payload(json!({"id": "small", "name": "Small", "member_count": 3})),
                    payload(json!({"id": "big", "name": "Big", "member_count": 40})),
                    payload(json!({"id": "new", "name": "New"})),
                ],
            )
            .await;
        let repo = GroupRepository::new(Arc::new(memory), signed_in(), RepositoryOptions::default());

        let ids: Vec<String> = repo.list_groups().await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec!["big", "small", "new"]);
    }

    #[tokio::test]
    async fn test_create_group_writes_leader_membership() {
        let memory = Arc::new(InMemoryGateway::new("mem://storage"));
        let repo = GroupRepository::new(memory.clone(), signed_in(), RepositoryOptions::default());

        let group = repo.create_group(NewGroup::named("Choir")).await.unwrap();
        assert_eq!(group.status, GroupStatus::Pending);
        assert_eq!(group.leader_id.as_deref(), Some("u1"));
        assert_eq!(group.member_count, 1);
        assert_eq!(memory.rows(Table::Groups).await[0]["member_count"], json!(1));

        let members = memory.rows(Table::GroupMembers).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0]["group_id"], json!(group.id));
        assert_eq!(members[0]["role"], json!("admin"));
        assert_eq!(members[0]["status"], json!("approved"));
    }

    #[tokio::test]
    async fn test_membership_failure_is_not_surfaced() {
        let memory = InMemoryGateway::new("mem://storage");
        memory.inject_failure(Fault::Insert { table: Table::GroupMembers });
        let repo = GroupRepository::new(Arc::new(memory), signed_in(), RepositoryOptions::default());

        let group = repo.create_group(NewGroup::named("X")).await.unwrap();
        assert!(!group.id.is_empty());
        assert_eq!(group.member_count, 0);
        let listed = repo.list_groups().await.unwrap();
        let stored = listed.iter().find(|g| g.id == group.id).unwrap();
        assert_eq!(stored.member_count, 0);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let repo = GroupRepository::new(
            Arc::new(InMemoryGateway::new("mem://storage")),
            signed_in(),
            RepositoryOptions::default(),
        );
        let err = repo.create_group(NewGroup::named("  ")).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationFailure(_)));
    }
}
