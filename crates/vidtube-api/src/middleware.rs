use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::auth::ACCESS_COOKIE;
use crate::error::ApiError;
use crate::state::{AppState, run_db};

/// Resolve the caller from the `accessToken` cookie, falling back to an
/// `Authorization: Bearer` header, and stash the `User` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
        });

    let user = run_db(&state, move |s| {
        Ok(s.sessions.verify_access(&s.db, token.as_deref())?)
    })
    .await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
