// Comment repository - threaded comment lists per post

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{assemble_thread, author_for, resolve_authors, MutationTracker, RepositoryOptions};
use crate::entities::{payload, Author, Comment, CommentRow, Entity, NewComment};
use crate::error::{AppError, AppResult};
use crate::infrastructure::auth::{require_actor, AuthProvider};
use crate::infrastructure::cache::{CacheKey, QueryCache, QueryState};
use crate::infrastructure::gateway::{Direction, FilterSpec, Gateway, MutationOp, Table};

pub const COMMENTS_FAMILY: &str = "comments";

#[derive(Clone)]
pub struct CommentRepository {
    gateway: Arc<dyn Gateway>,
    auth: Arc<dyn AuthProvider>,
    cache: Arc<QueryCache<Vec<Comment>>>,
    add_tracker: Arc<MutationTracker>,
    options: RepositoryOptions,
}

impl CommentRepository {
    pub fn new(gateway: Arc<dyn Gateway>, auth: Arc<dyn AuthProvider>, options: RepositoryOptions) -> Self {
        Self {
            cache: Arc::new(QueryCache::new(options.cache_capacity)),
            add_tracker: Arc::new(MutationTracker::default()),
            gateway,
            auth,
            options,
        }
    }

    pub fn cache_key(post_id: &str) -> CacheKey {
        CacheKey::new(COMMENTS_FAMILY, post_id)
    }

    /// Root comments of `post_id` in creation order, replies nested beneath them.
    #[instrument(skip(self))]
    pub async fn list_comments(&self, post_id: &str) -> AppResult<Vec<Comment>> {
        self.cache
            .read_through(&Self::cache_key(post_id), || self.fetch_comments(post_id))
            .await
    }

    async fn fetch_comments(&self, post_id: &str) -> AppResult<Vec<Comment>> {
        let filter = FilterSpec::all()
            .eq("post_id", post_id)
            .order_by("created_at", Direction::Ascending, true);
        let rows = self
            .gateway
            .query(Table::Comments, &filter)
            .await
            .map_err(AppError::upstream("list_comments"))?;
        let rows = CommentRow::from_rows(rows)?;

        let authors = resolve_authors(&self.gateway, rows.iter().filter_map(|row| row.user_id.as_deref())).await?;
        let flat: Vec<Comment> = rows
            .into_iter()
            .map(|row| {
                let author = author_for(&authors, row.user_id.as_deref());
                row.into_comment(author)
            })
            .collect();

        debug!("Fetched {} comments for post {}", flat.len(), post_id);
        Ok(assemble_thread(flat))
    }

    pub fn comments_state(&self, post_id: &str) -> QueryState<Vec<Comment>> {
        self.cache.state(&Self::cache_key(post_id))
    }

    pub fn add_comment_pending(&self) -> bool {
        self.add_tracker.is_pending()
    }

    #[instrument(skip(self, input), fields(reply = input.parent_id.is_some()))]
    pub async fn add_comment(&self, post_id: &str, input: NewComment) -> AppResult<Comment> {
        let _pending = self.add_tracker.begin();
        let actor = require_actor(self.auth.as_ref()).await?;
        let content = input.content.trim();
        if content.is_empty() {
            return Err(AppError::validation("Comment content must not be blank"));
        }

        let row = self
            .gateway
            .mutate(
                Table::Comments,
                MutationOp::Insert,
                payload(json!({
                    "post_id": post_id,
                    "user_id": actor.id,
                    "content": content,
                    "parent_id": input.parent_id,
                })),
            )
            .await
            .map_err(AppError::upstream("add_comment"))?;

        let comment = CommentRow::from_row(row)?.into_comment(Author::from(&actor));
        info!("Added comment {} to post {}", comment.id, post_id);

        self.invalidate(post_id);
        Ok(comment)
    }

    /// Mark the post's comment list stale and re-fetch it in the background when enabled.
    pub fn invalidate(&self, post_id: &str) {
        if !self.cache.invalidate(&Self::cache_key(post_id)) || !self.options.refetch_on_invalidate {
            return;
        }

        let repository = self.clone();
        let post_id = post_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = repository.list_comments(&post_id).await {
                warn!("Background refresh of comments for {} failed: {}", post_id, err);
            }
        });
    }

    pub fn invalidate_all(&self) {
        let count = self.cache.invalidate_all();
        debug!("Invalidated {} comment lists", count);
    }
}
