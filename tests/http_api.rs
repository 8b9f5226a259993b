use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use community_feed::{
    app_state::AppState,
    community_interface::create_community_router,
    config::Config,
    infrastructure::{
        auth::RequestAuth,
        gateway::{Fault, Gateway, InMemoryGateway, Table},
    },
};

fn router_with(memory: Arc<InMemoryGateway>) -> Router {
    let gateway: Arc<dyn Gateway> = memory;
    let state = AppState::with_gateway(Config::default(), gateway, Arc::new(RequestAuth));
    create_community_router(state)
}

fn router() -> Router {
    router_with(Arc::new(InMemoryGateway::new("mem://storage")))
}

fn json_request(method: &str, uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user).header("x-user-name", "Ada");
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let app = router();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["gateway"], "memory");
}

#[tokio::test]
async fn test_create_and_list_posts() {
    let app = router();

    let (status, created) = send(
        &app,
        json_request(
            "POST",
            "/posts",
            Some("u1"),
            json!({
                "content": "<p>Hello</p>",
                "content_text": "Hello",
                "media": [{"file_name": "a.png", "content_type": "image/png", "data": "AQID"}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["author"]["id"], "u1");
    assert_eq!(created["author"]["display_name"], "Ada");
    assert_eq!(created["media"][0]["kind"], "image");

    let (status, listed) = send(&app, get("/posts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, group_feed) = send(&app, get("/posts?group_id=g1")).await;
    assert!(group_feed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_anonymous_mutation_is_unauthorized() {
    let app = router();
    let (status, body) = send(&app, json_request("POST", "/posts", None, json!({"content_text": "hi"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
}

#[tokio::test]
async fn test_validation_and_upload_errors() {
    let memory = Arc::new(InMemoryGateway::new("mem://storage"));
    memory.inject_failure(Fault::Upload {
        file_name: "broken.png".to_string(),
    });
    let app = router_with(memory.clone());

    let (status, _) = send(&app, json_request("POST", "/groups", Some("u1"), json!({"name": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/posts",
            Some("u1"),
            json!({"content_text": "x", "media": [{"file_name": "broken.png", "data": "AQID"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(memory.rows(Table::Posts).await.is_empty());
}

#[tokio::test]
async fn test_like_and_unlike_routes() {
    let app = router();
    let (_, created) = send(&app, json_request("POST", "/posts", Some("u1"), json!({"content_text": "like me"}))).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, liked) = send(&app, json_request("POST", &format!("/posts/{}/like", id), Some("u2"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(liked["likes_count"], 1);
    assert_eq!(liked["has_liked"], true);

    let (status, unliked) =
        send(&app, json_request("DELETE", &format!("/posts/{}/like", id), Some("u2"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unliked["likes_count"], 0);

    let (status, _) = send(&app, json_request("POST", "/posts/nope/like", Some("u2"), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_comment_routes_return_threads() {
    let app = router();
    let (_, root) = send(
        &app,
        json_request("POST", "/posts/p1/comments", Some("u1"), json!({"content": "First"})),
    )
    .await;
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/posts/p1/comments",
            Some("u2"),
            json!({"content": "Reply", "parent_id": root["id"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, thread) = send(&app, get("/posts/p1/comments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread.as_array().unwrap().len(), 1);
    assert_eq!(thread[0]["replies"][0]["content"], "Reply");
}

#[tokio::test]
async fn test_group_and_cross_post_routes() {
    let app = router();
    let (status, group) = send(&app, json_request("POST", "/groups", Some("u1"), json!({"name": "Choir"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["status"], "pending");

    let (_, groups) = send(&app, get("/groups")).await;
    assert_eq!(groups.as_array().unwrap().len(), 1);

    let (status, pair) = send(
        &app,
        json_request(
            "POST",
            "/posts/cross-post",
            Some("u1"),
            json!({"content_text": "Concert Friday", "group_id": group["id"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pair["group_post"]["group_id"], group["id"]);
    assert_eq!(pair["public_post"]["group_id"], Value::Null);
}
