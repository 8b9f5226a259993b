// Viewer middleware - lifts the identity forwarded by the upstream auth proxy
// into request scope so `RequestAuth` can resolve the actor for mutations

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::infrastructure::auth::{with_viewer, CurrentUser};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_AVATAR_HEADER: &str = "x-user-avatar";

/// Runs the rest of the request inside the viewer's scope.
pub async fn viewer_context_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let viewer = extract_viewer(request.headers())?;
    match &viewer {
        Some(user) => debug!("Request on behalf of {}", user.id),
        None => debug!("Anonymous request"),
    }
    Ok(with_viewer(viewer, next.run(request)).await)
}

/// Read the viewer from forwarded identity headers. No user id means anonymous.
fn extract_viewer(headers: &HeaderMap) -> Result<Option<CurrentUser>, StatusCode> {
    let header = |name: &str| -> Result<Option<String>, StatusCode> {
        headers
            .get(name)
            .map(|value| {
                value
                    .to_str()
                    .map(|s| s.trim().to_string())
                    .map_err(|_| StatusCode::BAD_REQUEST)
            })
            .transpose()
            .map(|value| value.filter(|s| !s.is_empty()))
    };

    let Some(id) = header(USER_ID_HEADER)? else {
        return Ok(None);
    };
    let display_name = header(USER_NAME_HEADER)?.unwrap_or_else(|| "Friend".to_string());

    Ok(Some(CurrentUser {
        id,
        display_name,
        avatar_url: header(USER_AVATAR_HEADER)?,
    }))
}
