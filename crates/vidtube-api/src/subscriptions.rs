use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use vidtube_types::api::{PageQuery, SubscriptionToggleResponse};
use vidtube_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, parse_id};
use crate::response::{ok, respond};
use crate::state::{AppState, run_db};

/// POST /subscriptions/c/{channelId}
pub async fn toggle_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(channel_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let channel = parse_id(&channel_id, "channel")?;
    if channel == user.id {
        return Err(ApiError::bad_request("You cannot subscribe to your own channel"));
    }

    let subscriber = user.id;
    let is_subscribed = run_db(&state, move |s| {
        if !s.db.user_exists(channel)? {
            return Err(ApiError::not_found("Channel not found"));
        }
        Ok(s.db.toggle_subscription(subscriber, channel)?)
    })
    .await?;

    let (status, message) = if is_subscribed {
        (StatusCode::CREATED, "Subscribed successfully")
    } else {
        (StatusCode::OK, "Unsubscribed successfully")
    };
    Ok(respond(status, message, SubscriptionToggleResponse { is_subscribed }))
}

/// GET /subscriptions/c/{channelId}?page&limit
pub async fn channel_subscribers(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let channel = parse_id(&channel_id, "channel")?;
    let page = page.normalized();
    let subscribers = run_db(&state, move |s| {
        if !s.db.user_exists(channel)? {
            return Err(ApiError::not_found("Channel not found"));
        }
        Ok(s.db.subscribers_page(channel, page)?)
    })
    .await?;

    Ok(ok("Subscribers fetched successfully", subscribers))
}

/// GET /subscriptions/u/{subscriberId}?page&limit
pub async fn subscribed_channels(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let subscriber = parse_id(&subscriber_id, "subscriber")?;
    let page = page.normalized();
    let channels = run_db(&state, move |s| {
        if !s.db.user_exists(subscriber)? {
            return Err(ApiError::not_found("User not found"));
        }
        Ok(s.db.subscribed_channels_page(subscriber, page)?)
    })
    .await?;

    Ok(ok("Subscribed channels fetched successfully", channels))
}
