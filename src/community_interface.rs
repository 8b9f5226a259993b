// Community HTTP interface - JSON endpoints over the entity repositories
// Identity comes from the viewer middleware; every handler defers to a repository

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    app_state::AppState,
    entities::{Comment, Group, NewComment, NewGroup, NewPost, Post},
    error::{AppError, AppResult},
    infrastructure::{gateway::Blob, middleware::viewer_context_middleware},
    repositories::PostScope,
};

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub group_id: Option<String>,
}

impl From<ScopeQuery> for PostScope {
    fn from(query: ScopeQuery) -> Self {
        PostScope {
            group_id: query.group_id.filter(|id| !id.is_empty()),
        }
    }
}

/// A media file inside a JSON request, bytes base64-encoded.
#[derive(Debug, Deserialize)]
pub struct MediaUpload {
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub data: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaUpload>,
}

impl CreatePostRequest {
    fn into_new_post(self) -> AppResult<NewPost> {
        let media_files = self
            .media
            .into_iter()
            .enumerate()
            .map(|(index, upload)| -> AppResult<Blob> {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(upload.data.as_bytes())
                    .map_err(|e| AppError::validation(format!("Media {} is not valid base64: {}", index, e)))?;
                Ok(Blob::new(upload.file_name, upload.content_type, bytes))
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(NewPost {
            content: self.content,
            content_text: self.content_text,
            title: self.title,
            media_files,
            group_id: self.group_id.filter(|id| !id.is_empty()),
        })
    }
}

// HTTP Handlers

pub async fn list_posts_handler(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Vec<Post>>, AppError> {
    let posts = state.posts.list_posts(&query.into()).await?;
    Ok(Json(posts))
}

pub async fn create_post_handler(
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    let post = state.posts.create_post(req.into_new_post()?).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn create_cross_post_handler(
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let (group_post, public_post) = state.posts.create_cross_post(req.into_new_post()?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"group_post": group_post, "public_post": public_post})),
    ))
}

pub async fn like_post_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Post>, AppError> {
    let post = state.posts.set_liked(&query.into(), &post_id, true).await?;
    Ok(Json(post))
}

pub async fn unlike_post_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<Post>, AppError> {
    let post = state.posts.set_liked(&query.into(), &post_id, false).await?;
    Ok(Json(post))
}

pub async fn list_comments_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let comments = state.comments.list_comments(&post_id).await?;
    Ok(Json(comments))
}

pub async fn add_comment_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
    Json(req): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let comment = state.comments.add_comment(&post_id, req).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_groups_handler(State(state): State<AppState>) -> Result<Json<Vec<Group>>, AppError> {
    let groups = state.groups.list_groups().await?;
    Ok(Json(groups))
}

pub async fn create_group_handler(
    State(state): State<AppState>,
    Json(req): Json<NewGroup>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let group = state.groups.create_group(req).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "gateway": state.config.gateway.backend,
        "realtime_subscriptions": state.realtime.active_subscriptions(),
    }))
}

pub fn create_community_router(state: AppState) -> Router {
    Router::new()
        // Posts
        .route("/posts", get(list_posts_handler).post(create_post_handler))
        .route("/posts/cross-post", post(create_cross_post_handler))
        .route("/posts/{id}/like", post(like_post_handler).delete(unlike_post_handler))
        // Comments
        .route("/posts/{id}/comments", get(list_comments_handler).post(add_comment_handler))
        // Groups
        .route("/groups", get(list_groups_handler).post(create_group_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(viewer_context_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_is_decoded_in_order() {
        let req: CreatePostRequest = serde_json::from_value(json!({
            "content_text": "pics",
            "media": [
                {"file_name": "a.png", "content_type": "image/png", "data": "AQID"},
                {"file_name": "b.mp4", "data": "BAU="}
            ]
        }))
        .unwrap();
        let post = req.into_new_post().unwrap();
        assert_eq!(post.media_files.len(), 2);
        assert_eq!(post.media_files[0].bytes, vec![1, 2, 3]);
        assert_eq!(post.media_files[1].file_name, "b.mp4");
        assert_eq!(post.media_files[1].content_type, "application/octet-stream");
    }

    #[test]
    fn test_bad_base64_is_validation_failure() {
        let req: CreatePostRequest = serde_json::from_value(json!({
            "media": [{"file_name": "a.png", "data": "not base64!"}]
        }))
        .unwrap();
        assert!(matches!(req.into_new_post(), Err(AppError::ValidationFailure(_))));
    }

    #[test]
    fn test_empty_group_id_means_public() {
        let scope: PostScope = ScopeQuery { group_id: Some(String::new()) }.into();
        assert_eq!(scope, PostScope::public());
    }
}
