// Core infrastructure modules
pub mod auth; // Actor identity and per-request viewer
pub mod cache; // Scope-keyed query cache
pub mod gateway; // Remote data gateway and its backends
pub mod middleware; // HTTP middleware

pub use auth::{AuthProvider, CurrentUser, RequestAuth, StaticAuth};
pub use cache::{CacheKey, QueryCache, QueryState};
pub use gateway::{Gateway, GatewayError, InMemoryGateway, SqliteGateway};
