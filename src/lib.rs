// Community feed - data-synchronization layer for posts, comments and groups
// over a hosted backend, with scope-keyed caching and an HTTP surface

// Configuration and application wiring
pub mod app_state;
pub mod config;

// HTTP interface
pub mod community_interface;

// Domain entities
pub mod entities;

// Gateway, cache, auth and middleware
pub mod infrastructure;

// Entity repositories and thread assembly
pub mod repositories;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
