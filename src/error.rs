use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::infrastructure::gateway::GatewayError;

#[derive(Debug)]
pub enum AppError {
    /// A mutation was attempted with no resolvable actor identity.
    NotAuthenticated,
    /// A gateway call failed; `operation` names the repository step that issued it.
    UpstreamFailure {
        operation: &'static str,
        source: GatewayError,
    },
    /// One or more media uploads failed during post creation; nothing was inserted.
    PartialUploadFailure {
        failed: Vec<usize>,
        total: usize,
        source: GatewayError,
    },
    ValidationFailure(String),
    NotFound(String),
    Configuration(String),
    Internal(String),
}

impl AppError {
    pub fn upstream(operation: &'static str) -> impl FnOnce(GatewayError) -> AppError {
        move |source| AppError::UpstreamFailure { operation, source }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationFailure(msg.into())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotAuthenticated => write!(f, "Not authenticated"),
            AppError::UpstreamFailure { operation, source } => {
                write!(f, "Upstream failure during {}: {}", operation, source)
            }
            AppError::PartialUploadFailure {
                failed,
                total,
                source,
            } => write!(
                f,
                "Media upload failed for {} of {} files (first failure at index {}): {}",
                failed.len(),
                total,
                failed.first().copied().unwrap_or_default(),
                source
            ),
            AppError::ValidationFailure(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::UpstreamFailure { source, .. } => Some(source),
            AppError::PartialUploadFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::UpstreamFailure { .. } => {
                tracing::error!("{}", self);
                (StatusCode::BAD_GATEWAY, "Upstream service failure".to_string())
            }
            AppError::PartialUploadFailure { .. } => {
                tracing::error!("{}", self);
                (StatusCode::BAD_GATEWAY, "Failed to upload media".to_string())
            }
            AppError::ValidationFailure(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Configuration(msg) | AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Malformed row: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::validation("Group name is required");
        assert_eq!(err.to_string(), "Validation error: Group name is required");

        let err = AppError::PartialUploadFailure {
            failed: vec![1],
            total: 2,
            source: GatewayError::Storage("bucket unavailable".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Media upload failed for 1 of 2 files (first failure at index 1): Storage error: bucket unavailable"
        );
    }

    #[test]
    fn test_upstream_keeps_cause() {
        let err = AppError::upstream("list_posts")(GatewayError::Backend("timeout".into()));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Backend error: timeout"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotAuthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::validation("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        let upstream = AppError::upstream("create_group")(GatewayError::Constraint("dup".into()));
        assert_eq!(upstream.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
