use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use vidtube_types::api::ContentRequest;
use vidtube_types::models::{Tweet, User};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, parse_id, required};
use crate::response::{created, ok};
use crate::state::{AppState, AppStateInner, run_db};

fn owned_tweet(s: &AppStateInner, id: Uuid, user_id: Uuid) -> ApiResult<Tweet> {
    let tweet = s
        .db
        .get_tweet(id)?
        .ok_or_else(|| ApiError::not_found("Tweet not found"))?;
    if tweet.owner != user_id {
        return Err(ApiError::forbidden("You are not the owner of this tweet"));
    }
    Ok(tweet)
}

/// POST /tweets
pub async fn create_tweet(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = required(Some(&req.content), "content")?.to_string();
    let owner = user.id;
    let tweet = run_db(&state, move |s| Ok(s.db.create_tweet(Uuid::new_v4(), owner, &content)?)).await?;
    Ok(created("Tweet created successfully", tweet))
}

/// GET /tweets/user/{userId}
pub async fn user_tweets(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let owner = parse_id(&user_id, "user")?;
    let tweets = run_db(&state, move |s| {
        if !s.db.user_exists(owner)? {
            return Err(ApiError::not_found("User not found"));
        }
        Ok(s.db.get_user_tweets(owner)?)
    })
    .await?;
    Ok(ok("Tweets fetched successfully", tweets))
}

/// PATCH /tweets/{tweetId}
pub async fn update_tweet(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(tweet_id): Path<String>,
    ApiJson(req): ApiJson<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&tweet_id, "tweet")?;
    let content = required(Some(&req.content), "content")?.to_string();
    let user_id = user.id;
    let tweet = run_db(&state, move |s| {
        owned_tweet(s, id, user_id)?;
        s.db.update_tweet(id, &content)?
            .ok_or_else(|| ApiError::not_found("Tweet not found"))
    })
    .await?;
    Ok(ok("Tweet updated successfully", tweet))
}

/// DELETE /tweets/{tweetId}
pub async fn delete_tweet(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(tweet_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&tweet_id, "tweet")?;
    let user_id = user.id;
    let tweet = run_db(&state, move |s| {
        let tweet = owned_tweet(s, id, user_id)?;
        s.db.delete_tweet(id)?;
        Ok(tweet)
    })
    .await?;
    Ok(ok("Tweet deleted successfully", tweet))
}
