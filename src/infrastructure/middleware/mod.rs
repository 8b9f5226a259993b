// Viewer middleware - installs the request's identity for the auth provider

pub mod viewer_context_middleware;

pub use viewer_context_middleware::*;
