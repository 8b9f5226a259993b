// Realtime bridge - routes gateway change notifications to repository caches

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{CommentRepository, GroupRepository, PostRepository, PostScope};
use crate::infrastructure::gateway::{ChangeCallback, ChangeEvent, FilterSpec, Gateway, Subscription, Table};

/// Keeps one subscription per watched table alive for as long as the bridge lives.
pub struct RealtimeBridge {
    subscriptions: Vec<Subscription>,
    invalidate_on_change: bool,
}

#[derive(Clone)]
struct Router {
    posts: PostRepository,
    comments: CommentRepository,
    groups: GroupRepository,
    invalidate_on_change: bool,
}

impl Router {
    fn route(&self, event: ChangeEvent) {
        if !self.invalidate_on_change {
            debug!("{:?} on {}: {}", event.kind, event.table, row_id(&event));
            return;
        }

        match event.table {
            Table::Posts => {
                let scope = PostScope {
                    group_id: string_column(&event, "group_id"),
                };
                info!("Remote {:?} on posts, refreshing {}", event.kind, scope.cache_key());
                self.posts.invalidate(&scope);
            }
            Table::Comments => match string_column(&event, "post_id") {
                Some(post_id) => {
                    info!("Remote {:?} on comments, refreshing post {}", event.kind, post_id);
                    self.comments.invalidate(&post_id);
                }
                None => self.comments.invalidate_all(),
            },
            Table::Groups | Table::GroupMembers => {
                info!("Remote {:?} on {}, refreshing groups", event.kind, event.table);
                self.groups.invalidate();
            }
            Table::Users | Table::PostLikes => {}
        }
    }
}

impl RealtimeBridge {
    pub const WATCHED: [Table; 4] = [Table::Posts, Table::Comments, Table::Groups, Table::GroupMembers];

    /// Subscribe to every watched table. Must be called from within a tokio runtime.
    pub fn attach(
        gateway: &Arc<dyn Gateway>,
        posts: PostRepository,
        comments: CommentRepository,
        groups: GroupRepository,
        invalidate_on_change: bool,
    ) -> Self {
        let router = Router {
            posts,
            comments,
            groups,
            invalidate_on_change,
        };

        let subscriptions = Self::WATCHED
            .iter()
            .map(|&table| {
                let router = router.clone();
                let on_change: ChangeCallback = Arc::new(move |event| router.route(event));
                gateway.subscribe(table, FilterSpec::all(), on_change)
            })
            .collect();

        info!(
            "Realtime bridge attached to {} tables (invalidate_on_change = {})",
            Self::WATCHED.len(),
            invalidate_on_change
        );
        Self {
            subscriptions,
            invalidate_on_change,
        }
    }

    pub fn invalidates_on_change(&self) -> bool {
        self.invalidate_on_change
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_active()).count()
    }

    pub fn detach(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

fn string_column(event: &ChangeEvent, column: &str) -> Option<String> {
    match event.row.get(column) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    }
}

fn row_id(event: &ChangeEvent) -> String {
    string_column(event, "id").unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{payload, NewPost};
    use crate::infrastructure::auth::{CurrentUser, StaticAuth};
    use crate::infrastructure::gateway::{InMemoryGateway, MutationOp};
    use crate::repositories::RepositoryOptions;
    use serde_json::json;
    use std::time::Duration;

    fn repositories(gateway: &Arc<dyn Gateway>) -> (PostRepository, CommentRepository, GroupRepository) {
        let auth = Arc::new(StaticAuth::signed_in(CurrentUser::new("u1", "Ada")));
        let options = RepositoryOptions {
            refetch_on_invalidate: false,
            ..RepositoryOptions::default()
        };
        (
            PostRepository::new(gateway.clone(), auth.clone(), options.clone()),
            CommentRepository::new(gateway.clone(), auth.clone(), options.clone()),
            GroupRepository::new(gateway.clone(), auth, options),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_remote_insert_marks_scope_stale() {
        let gateway: Arc<dyn Gateway> = Arc::new(InMemoryGateway::new("mem://storage"));
        let (posts, comments, groups) = repositories(&gateway);
        let bridge = RealtimeBridge::attach(&gateway, posts.clone(), comments, groups, true);
        assert_eq!(bridge.active_subscriptions(), 4);

        posts.list_posts(&PostScope::group("g1")).await.unwrap();
        posts.list_posts(&PostScope::public()).await.unwrap();

        gateway
            .mutate(
                Table::Posts,
                MutationOp::Insert,
                payload(json!({"user_id": "u2", "content_text": "remote", "group_id": "g1"})),
            )
            .await
            .unwrap();
        settle().await;

        assert!(posts.posts_state(&PostScope::group("g1")).is_stale);
        assert!(!posts.posts_state(&PostScope::public()).is_stale);
    }

    #[tokio::test]
    async fn test_log_only_mode_leaves_cache_fresh() {
        let gateway: Arc<dyn Gateway> = Arc::new(InMemoryGateway::new("mem://storage"));
        let (posts, comments, groups) = repositories(&gateway);
        let _bridge = RealtimeBridge::attach(&gateway, posts.clone(), comments, groups.clone(), false);

        groups.list_groups().await.unwrap();
        posts.list_posts(&PostScope::public()).await.unwrap();
        posts.create_post(NewPost::text("hello")).await.unwrap();
        gateway
            .mutate(Table::Groups, MutationOp::Insert, payload(json!({"name": "Remote"})))
            .await
            .unwrap();
        settle().await;

        // create_post invalidates its own scope; the remote group insert does nothing
        assert!(posts.posts_state(&PostScope::public()).is_stale);
        assert!(!groups.groups_state().is_stale);
    }

    #[tokio::test]
    async fn test_detach_stops_delivery() {
        let gateway: Arc<dyn Gateway> = Arc::new(InMemoryGateway::new("mem://storage"));
        let (posts, comments, groups) = repositories(&gateway);
        let bridge = RealtimeBridge::attach(&gateway, posts, comments.clone(), groups, true);

        comments.list_comments("p1").await.unwrap();
        bridge.detach();
        tokio::task::yield_now().await;

        gateway
            .mutate(
                Table::Comments,
                MutationOp::Insert,
                payload(json!({"post_id": "p1", "user_id": "u2", "content": "late"})),
            )
            .await
            .unwrap();
        settle().await;

        assert!(!comments.comments_state("p1").is_stale);
    }
}
