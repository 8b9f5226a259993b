use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::{
    config::{Config, GatewayBackend},
    infrastructure::{
        auth::{AuthProvider, RequestAuth},
        gateway::{Gateway, InMemoryGateway, SqliteGateway},
    },
    repositories::{CommentRepository, GroupRepository, PostRepository, RealtimeBridge, RepositoryOptions},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub gateway: Arc<dyn Gateway>,
    pub posts: PostRepository,
    pub comments: CommentRepository,
    pub groups: GroupRepository,
    pub realtime: Arc<RealtimeBridge>,
}

impl AppState {
    /// Build the configured gateway and wire repositories to per-request auth.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let gateway: Arc<dyn Gateway> = match config.gateway.backend {
            GatewayBackend::Memory => Arc::new(InMemoryGateway::new(config.gateway.public_base_url.clone())),
            GatewayBackend::Sqlite => {
                ensure_database_dir(&config.gateway.database_url)?;
                let sqlite =
                    SqliteGateway::connect(&config.gateway.database_url, config.gateway.public_base_url.clone()).await?;
                sqlite.initialize().await?;
                Arc::new(sqlite)
            }
        };
        info!("Using {} gateway", config.gateway.backend);

        Ok(Self::with_gateway(config, gateway, Arc::new(RequestAuth)))
    }

    /// Must be called from within a tokio runtime.
    pub fn with_gateway(config: Config, gateway: Arc<dyn Gateway>, auth: Arc<dyn AuthProvider>) -> Self {
        let options = RepositoryOptions {
            cache_capacity: config.cache.capacity,
            media_bucket: config.gateway.bucket.clone(),
            ..RepositoryOptions::default()
        };

        let posts = PostRepository::new(gateway.clone(), auth.clone(), options.clone());
        let comments = CommentRepository::new(gateway.clone(), auth.clone(), options.clone());
        let groups = GroupRepository::new(gateway.clone(), auth, options);
        let realtime = RealtimeBridge::attach(
            &gateway,
            posts.clone(),
            comments.clone(),
            groups.clone(),
            config.realtime.invalidate_on_change,
        );

        Self {
            config,
            gateway,
            posts,
            comments,
            groups,
            realtime: Arc::new(realtime),
        }
    }
}

/// SQLite creates the database file on demand but not its directory.
fn ensure_database_dir(database_url: &str) -> anyhow::Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
