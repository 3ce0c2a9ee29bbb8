use axum::{
    Extension,
    extract::State,
    response::IntoResponse,
};

use vidtube_types::models::User;

use crate::error::ApiResult;
use crate::response::ok;
use crate::state::{AppState, run_db};

/// GET /dashboard/stats
pub async fn channel_stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let owner = user.id;
    let stats = run_db(&state, move |s| Ok(s.db.dashboard_stats(owner)?)).await?;
    Ok(ok("Channel stats fetched successfully", stats))
}

/// GET /dashboard/videos: every video of the caller's channel, published or not.
pub async fn channel_videos(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let owner = user.id;
    let videos = run_db(&state, move |s| Ok(s.db.channel_videos(owner)?)).await?;
    Ok(ok("Channel videos fetched successfully", videos))
}

/// GET /healthcheck
pub async fn healthcheck() -> impl IntoResponse {
    ok("Health check passed", "OK")
}
