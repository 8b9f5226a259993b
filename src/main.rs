// Community Feed Server

use axum::{routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use community_feed::{app_state::AppState, community_interface::create_community_router, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;

    // Build main application router
    let app = Router::new()
        .route("/", get(|| async { Json(json!({"service": "community_feed"})) }))
        .nest("/api/v1/community", create_community_router(app_state))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = config.server_address();
    info!("Community feed server starting on http://{}", addr);
    info!("  GET    /api/v1/community/posts?group_id=        - List posts in a scope");
    info!("  POST   /api/v1/community/posts                  - Create post");
    info!("  POST   /api/v1/community/posts/cross-post       - Post to a group and the public feed");
    info!("  POST   /api/v1/community/posts/{{id}}/like        - Like post");
    info!("  DELETE /api/v1/community/posts/{{id}}/like        - Unlike post");
    info!("  GET    /api/v1/community/posts/{{id}}/comments    - Threaded comments");
    info!("  POST   /api/v1/community/posts/{{id}}/comments    - Add comment");
    info!("  GET    /api/v1/community/groups                 - List groups");
    info!("  POST   /api/v1/community/groups                 - Create group");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
