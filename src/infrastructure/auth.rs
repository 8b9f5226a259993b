// Actor identity for mutations, delegated to the hosted auth provider
// The current user is resolved per mutation and never cached

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::task_local;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Option<CurrentUser>;
}

/// Resolve the actor for a mutation or fail with `NotAuthenticated`.
pub async fn require_actor(auth: &dyn AuthProvider) -> AppResult<CurrentUser> {
    auth.current_user().await.ok_or(AppError::NotAuthenticated)
}

/// Fixed identity, for tests and single-user tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user: Option<CurrentUser>,
}

impl StaticAuth {
    pub fn signed_in(user: CurrentUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user(&self) -> Option<CurrentUser> {
        self.user.clone()
    }
}

task_local! {
    static VIEWER: Option<CurrentUser>;
}

/// Run `f` with `viewer` as the request's identity.
pub async fn with_viewer<F>(viewer: Option<CurrentUser>, f: F) -> F::Output
where
    F: Future,
{
    VIEWER.scope(viewer, f).await
}

/// Reads the identity installed by `with_viewer` for the current request.
/// Outside a request scope there is no viewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestAuth;

#[async_trait]
impl AuthProvider for RequestAuth {
    async fn current_user(&self) -> Option<CurrentUser> {
        VIEWER.try_with(|viewer| viewer.clone()).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_auth_reads_scoped_viewer() {
        let viewer = CurrentUser::new("u1", "Grace");
        let seen = with_viewer(Some(viewer.clone()), async { RequestAuth.current_user().await }).await;
        assert_eq!(seen, Some(viewer));
    }

    #[tokio::test]
    async fn test_request_auth_outside_scope_is_anonymous() {
        assert_eq!(RequestAuth.current_user().await, None);
    }

    #[tokio::test]
    async fn test_require_actor() {
        let err = require_actor(&StaticAuth::anonymous()).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthenticated));

        let user = require_actor(&StaticAuth::signed_in(CurrentUser::new("u2", "Sam")))
            .await
            .unwrap();
        assert_eq!(user.id, "u2");
    }
}
