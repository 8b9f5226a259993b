// Post repository - feed queries keyed by scope, post creation with media upload,
// cross-posting and the optimistic like protocol

use chrono::Utc;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{author_for, resolve_authors, MutationTracker, RepositoryOptions};
use crate::entities::{payload, Author, Entity, NewPost, Post, PostRow};
use crate::error::{AppError, AppResult};
use crate::infrastructure::auth::{require_actor, AuthProvider, CurrentUser};
use crate::infrastructure::cache::{CacheKey, QueryCache, QueryState, PUBLIC_SCOPE};
use crate::infrastructure::gateway::{Blob, Direction, FilterSpec, Gateway, MutationOp, Table};

pub const POSTS_FAMILY: &str = "posts";

static FILE_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,8}$").expect("extension pattern is valid"));

/// Which feed a post list belongs to: one group, or the public feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostScope {
    pub group_id: Option<String>,
}

impl PostScope {
    pub fn public() -> Self {
        Self { group_id: None }
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(POSTS_FAMILY, self.group_id.as_deref().unwrap_or(PUBLIC_SCOPE))
    }

    /// Pinned first (unset counts as not pinned), then newest first.
    fn filter(&self) -> FilterSpec {
        let filter = match &self.group_id {
            Some(group_id) => FilterSpec::all().eq("group_id", group_id.as_str()),
            None => FilterSpec::all().is_null("group_id"),
        };
        filter
            .order_by_or("is_pinned", Direction::Descending, false)
            .order_by("created_at", Direction::Descending, true)
    }
}

#[derive(Clone)]
pub struct PostRepository {
    gateway: Arc<dyn Gateway>,
    auth: Arc<dyn AuthProvider>,
    cache: Arc<QueryCache<Vec<Post>>>,
    create_tracker: Arc<MutationTracker>,
    like_tracker: Arc<MutationTracker>,
    options: RepositoryOptions,
}

impl PostRepository {
    pub fn new(gateway: Arc<dyn Gateway>, auth: Arc<dyn AuthProvider>, options: RepositoryOptions) -> Self {
        Self {
            cache: Arc::new(QueryCache::new(options.cache_capacity)),
            create_tracker: Arc::new(MutationTracker::default()),
            like_tracker: Arc::new(MutationTracker::default()),
            gateway,
            auth,
            options,
        }
    }

    /// Posts for `scope`, served from cache when fresh.
    /// `has_liked` reflects the current viewer and is never cached.
    #[instrument(skip(self))]
    pub async fn list_posts(&self, scope: &PostScope) -> AppResult<Vec<Post>> {
        let mut posts = self.cached_posts(scope).await?;
        if let Some(viewer) = self.auth.current_user().await {
            self.mark_viewer_likes(&viewer, &mut posts).await?;
        }
        Ok(posts)
    }

    async fn cached_posts(&self, scope: &PostScope) -> AppResult<Vec<Post>> {
        self.cache
            .read_through(&scope.cache_key(), || self.fetch_posts(scope))
            .await
    }

    /// One lookup for all listed posts.
    async fn mark_viewer_likes(&self, viewer: &CurrentUser, posts: &mut [Post]) -> AppResult<()> {
        if posts.is_empty() {
            return Ok(());
        }
        let filter = FilterSpec::all()
            .in_list("post_id", posts.iter().map(|post| post.id.clone()))
            .eq("user_id", viewer.id.as_str());
        let liked: HashSet<String> = self
            .gateway
            .query(Table::PostLikes, &filter)
            .await
            .map_err(AppError::upstream("read_likes"))?
            .into_iter()
            .filter_map(|row| row.get("post_id").and_then(|id| id.as_str()).map(str::to_string))
            .collect();
        for post in posts.iter_mut() {
            post.has_liked = liked.contains(&post.id);
        }
        Ok(())
    }

    async fn fetch_posts(&self, scope: &PostScope) -> AppResult<Vec<Post>> {
        let rows = self
            .gateway
            .query(Table::Posts, &scope.filter())
            .await
            .map_err(AppError::upstream("list_posts"))?;
        let rows = PostRow::from_rows(rows)?;

        let authors = resolve_authors(&self.gateway, rows.iter().filter_map(PostRow::author_id)).await?;
        let posts: Vec<Post> = rows
            .into_iter()
            .map(|row| {
                let author = author_for(&authors, row.author_id());
                row.into_post(author)
            })
            .collect();

        debug!("Fetched {} posts for {}", posts.len(), scope.cache_key());
        Ok(posts)
    }

    pub fn posts_state(&self, scope: &PostScope) -> QueryState<Vec<Post>> {
        self.cache.state(&scope.cache_key())
    }

    pub fn create_post_pending(&self) -> bool {
        self.create_tracker.is_pending()
    }

    pub fn like_pending(&self) -> bool {
        self.like_tracker.is_pending()
    }

    /// Upload media, insert the post, then invalidate its feed.
    /// Any failed upload aborts the whole operation before the insert.
    #[instrument(skip(self, input), fields(group_id = ?input.group_id, media = input.media_files.len()))]
    pub async fn create_post(&self, input: NewPost) -> AppResult<Post> {
        let _pending = self.create_tracker.begin();
        let actor = require_actor(self.auth.as_ref()).await?;
        if input.is_empty() {
            return Err(AppError::validation("A post needs text or media"));
        }

        let media_urls = self.upload_media(&actor, &input.media_files).await?;
        let media_urls = (!media_urls.is_empty()).then_some(media_urls);

        let row = self
            .gateway
            .mutate(
                Table::Posts,
                MutationOp::Insert,
                payload(json!({
                    "content": input.content,
                    "content_text": input.content_text,
                    "title": input.title,
                    "user_id": actor.id,
                    "author_id": actor.id,
                    "group_id": input.group_id,
                    "media_urls": media_urls,
                    "likes_count": 0,
                    "comments_count": 0,
                    "views_count": 0,
                    "is_pinned": false,
                })),
            )
            .await
            .map_err(AppError::upstream("create_post"))?;

        let post = PostRow::from_row(row)?.into_post(Author::from(&actor));
        let scope = PostScope {
            group_id: post.group_id.clone(),
        };
        info!("Created post {} in {}", post.id, scope.cache_key());

        self.invalidate(&scope);
        Ok(post)
    }

    /// Post into a group and mirror it to the public feed.
    /// Produces two independent posts, each with its own uploads and counters.
    pub async fn create_cross_post(&self, input: NewPost) -> AppResult<(Post, Post)> {
        if input.group_id.is_none() {
            return Err(AppError::validation("Cross-posting needs a target group"));
        }
        let public_copy = NewPost {
            group_id: None,
            ..input.clone()
        };

        let group_post = self.create_post(input).await?;
        let public_post = self.create_post(public_copy).await?;
        Ok((group_post, public_post))
    }

    /// Upload every file concurrently under the actor's folder, keeping input order.
    async fn upload_media(&self, actor: &CurrentUser, files: &[Blob]) -> AppResult<Vec<String>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let uploads = files.iter().map(|blob| {
            let path = media_path(&actor.id, &blob.file_name);
            async move {
                self.gateway
                    .upload_file(&self.options.media_bucket, &path, blob)
                    .await
            }
        });
        let results = join_all(uploads).await;

        let total = results.len();
        let mut urls = Vec::with_capacity(total);
        let mut failed = Vec::new();
        let mut first_error = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(url) => urls.push(url),
                Err(err) => {
                    failed.push(index);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => Ok(urls),
            Some(source) => {
                warn!(
                    "{} of {} media uploads failed; {} uploaded objects are left unreferenced",
                    failed.len(),
                    total,
                    urls.len()
                );
                Err(AppError::PartialUploadFailure { failed, total, source })
            }
        }
    }

    /// Like or unlike a post optimistically.
    ///
    /// The cached counter in `scope` moves by ±1 before the gateway writes;
    /// if either write fails the adjustment is reversed and the error surfaced.
    /// The stored counter is incremented in place, so concurrent likes all count.
    #[instrument(skip(self))]
    pub async fn set_liked(&self, scope: &PostScope, post_id: &str, liked: bool) -> AppResult<Post> {
        let _pending = self.like_tracker.begin();
        let actor = require_actor(self.auth.as_ref()).await?;
        let key = scope.cache_key();

        let mut current = self
            .cached_posts(scope)
            .await?
            .into_iter()
            .find(|post| post.id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found in {}", post_id, key)))?;

        // The cached list is shared between viewers, so the like row is the source of truth
        if self.has_like_row(&actor, post_id).await? == liked {
            current.has_liked = liked;
            return Ok(current);
        }

        let delta: i64 = if liked { 1 } else { -1 };
        self.adjust_like(&key, post_id, delta);

        match self.write_like(&actor, &current, liked, delta).await {
            Ok(mut post) => {
                post.has_liked = liked;
                self.invalidate(scope);
                Ok(post)
            }
            Err(err) => {
                warn!("Rolling back optimistic like on {}: {}", post_id, err);
                self.adjust_like(&key, post_id, -delta);
                Err(err)
            }
        }
    }

    async fn has_like_row(&self, actor: &CurrentUser, post_id: &str) -> AppResult<bool> {
        let rows = self
            .gateway
            .query(
                Table::PostLikes,
                &FilterSpec::all().eq("id", like_id(post_id, &actor.id)).limit(1),
            )
            .await
            .map_err(AppError::upstream("read_like"))?;
        Ok(!rows.is_empty())
    }

    fn adjust_like(&self, key: &CacheKey, post_id: &str, delta: i64) {
        self.cache.update(key, |posts| {
            if let Some(post) = posts.iter_mut().find(|post| post.id == post_id) {
                post.likes_count = (post.likes_count + delta).max(0);
            }
        });
    }

    async fn write_like(&self, actor: &CurrentUser, post: &Post, liked: bool, delta: i64) -> AppResult<Post> {
        let like_id = like_id(&post.id, &actor.id);
        if liked {
            self.gateway
                .mutate(
                    Table::PostLikes,
                    MutationOp::Insert,
                    payload(json!({"id": like_id, "post_id": post.id, "user_id": actor.id})),
                )
                .await
                .map_err(AppError::upstream("like_post"))?;
        } else {
            self.gateway
                .mutate(Table::PostLikes, MutationOp::Delete { id: like_id }, payload(json!({})))
                .await
                .map_err(AppError::upstream("unlike_post"))?;
        }

        let counted = self
            .gateway
            .mutate(
                Table::Posts,
                MutationOp::Increment {
                    id: post.id.clone(),
                    column: "likes_count".to_string(),
                    by: delta,
                },
                payload(json!({})),
            )
            .await;
        let row = match counted {
            Ok(row) => row,
            Err(err) => {
                self.revert_like_row(actor, &post.id, liked).await;
                return Err(AppError::upstream("update_like_count")(err));
            }
        };

        Ok(PostRow::from_row(row)?.into_post(post.author.clone()))
    }

    /// Undo the like row written before a failed counter update.
    async fn revert_like_row(&self, actor: &CurrentUser, post_id: &str, liked: bool) {
        let id = like_id(post_id, &actor.id);
        let reverted = if liked {
            self.gateway
                .mutate(Table::PostLikes, MutationOp::Delete { id: id.clone() }, payload(json!({})))
                .await
        } else {
            self.gateway
                .mutate(
                    Table::PostLikes,
                    MutationOp::Insert,
                    payload(json!({"id": id, "post_id": post_id, "user_id": actor.id})),
                )
                .await
        };
        if let Err(err) = reverted {
            warn!("Like row {} left inconsistent with its counter: {}", id, err);
        }
    }

    /// Mark `scope` stale and, if enabled, re-fetch it in the background.
    /// Callers never wait for the re-fetch.
    pub fn invalidate(&self, scope: &PostScope) {
        if !self.cache.invalidate(&scope.cache_key()) || !self.options.refetch_on_invalidate {
            return;
        }

        let repository = self.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            if let Err(err) = repository.cached_posts(&scope).await {
                warn!("Background refresh of {} failed: {}", scope.cache_key(), err);
            }
        });
    }

    pub fn invalidate_all(&self) {
        let count = self.cache.invalidate_all();
        debug!("Invalidated {} post lists", count);
    }
}

fn like_id(post_id: &str, user_id: &str) -> String {
    format!("{}:{}", post_id, user_id)
}

/// `{user_id}/{millis}-{uuid}.{ext}`, keeping the original extension when it looks sane.
fn media_path(user_id: &str, file_name: &str) -> String {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| FILE_EXTENSION.is_match(ext))
        .unwrap_or("bin")
        .to_ascii_lowercase();
    format!(
        "{}/{}-{}.{}",
        user_id,
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_cache_keys() {
        assert_eq!(PostScope::public().cache_key(), CacheKey::new("posts", "public"));
        assert_eq!(PostScope::group("g7").cache_key(), CacheKey::new("posts", "g7"));
    }

    #[test]
    fn test_media_path_shape() {
        let path = media_path("u1", "Holiday.JPG");
        assert!(path.starts_with("u1/"));
        assert!(path.ends_with(".jpg"));

        assert!(media_path("u1", "no_extension").ends_with(".bin"));
        assert!(media_path("u1", "evil.../../x").ends_with(".bin"));
    }
}
