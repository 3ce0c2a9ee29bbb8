use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use vidtube_types::api::LikeToggleResponse;
use vidtube_types::models::{LikeTarget, User};

use crate::error::{ApiError, ApiResult};
use crate::extract::parse_id;
use crate::response::{Envelope, ok, respond};
use crate::state::{AppState, run_db};
use crate::videos::visible_video;

async fn toggle(state: &AppState, user: &User, target: LikeTarget) -> ApiResult<Envelope<LikeToggleResponse>> {
    let actor = user.id;
    let is_liked = run_db(state, move |s| {
        let not_found = || ApiError::not_found(format!("{} not found", capitalized(target.kind())));
        match target {
            LikeTarget::Video(id) => {
                visible_video(s, id, actor)?;
            }
            // A comment is only reachable through a video the actor can see.
            LikeTarget::Comment(id) => {
                let comment = s.db.get_comment(id)?.ok_or_else(not_found)?;
                let video = s.db.get_video(comment.video)?;
                if !video.is_some_and(|v| v.is_published || v.owner == actor) {
                    return Err(not_found());
                }
            }
            LikeTarget::Tweet(_) => {
                if !s.db.like_target_exists(target)? {
                    return Err(not_found());
                }
            }
        }
        Ok(s.db.toggle_like(actor, target)?)
    })
    .await?;

    let (status, message) = if is_liked {
        (StatusCode::CREATED, "Liked successfully")
    } else {
        (StatusCode::OK, "Unliked successfully")
    };
    Ok(respond(status, message, LikeToggleResponse { is_liked }))
}

fn capitalized(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// POST /likes/toggle/v/{videoId}
pub async fn toggle_video_like(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&video_id, "video")?;
    toggle(&state, &user, LikeTarget::Video(id)).await
}

/// POST /likes/toggle/c/{commentId}
pub async fn toggle_comment_like(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(comment_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&comment_id, "comment")?;
    toggle(&state, &user, LikeTarget::Comment(id)).await
}

/// POST /likes/toggle/t/{tweetId}
pub async fn toggle_tweet_like(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(tweet_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&tweet_id, "tweet")?;
    toggle(&state, &user, LikeTarget::Tweet(id)).await
}

/// GET /likes/videos
pub async fn liked_videos(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user.id;
    let videos = run_db(&state, move |s| Ok(s.db.liked_videos(user_id)?)).await?;
    Ok(ok("Liked videos fetched successfully", videos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_capitalized_for_messages() {
        assert_eq!(capitalized("video"), "Video");
        assert_eq!(capitalized("tweet"), "Tweet");
        assert_eq!(capitalized(""), "");
    }
}
