use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use vidtube_types::api::{ContentRequest, PageQuery};
use vidtube_types::models::{Comment, User};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiQuery, parse_id, required};
use crate::response::{created, ok};
use crate::state::{AppState, AppStateInner, run_db};
use crate::videos::visible_video;

fn owned_comment(s: &AppStateInner, id: Uuid, user_id: Uuid) -> ApiResult<Comment> {
    let comment = s
        .db
        .get_comment(id)?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;
    if comment.owner != user_id {
        return Err(ApiError::forbidden("You are not the owner of this comment"));
    }
    Ok(comment)
}

/// GET /comments/{videoId}?page&limit
pub async fn video_comments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let video_id = parse_id(&video_id, "video")?;
    let page = page.normalized();
    let viewer = user.id;
    let comments = run_db(&state, move |s| {
        visible_video(s, video_id, viewer)?;
        Ok(s.db.comments_page(video_id, page)?)
    })
    .await?;

    Ok(ok("Comments fetched successfully", comments))
}

/// POST /comments/{videoId}
pub async fn add_comment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
    ApiJson(req): ApiJson<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let video_id = parse_id(&video_id, "video")?;
    let content = required(Some(&req.content), "content")?.to_string();
    let owner = user.id;

    let comment = run_db(&state, move |s| {
        visible_video(s, video_id, owner)?;
        Ok(s.db.create_comment(Uuid::new_v4(), video_id, owner, &content)?)
    })
    .await?;

    Ok(created("Comment added successfully", comment))
}

/// PATCH /comments/c/{commentId}
pub async fn update_comment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(comment_id): Path<String>,
    ApiJson(req): ApiJson<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&comment_id, "comment")?;
    let content = required(Some(&req.content), "content")?.to_string();
    let user_id = user.id;

    let comment = run_db(&state, move |s| {
        owned_comment(s, id, user_id)?;
        s.db.update_comment(id, &content)?
            .ok_or_else(|| ApiError::not_found("Comment not found"))
    })
    .await?;

    Ok(ok("Comment updated successfully", comment))
}

/// DELETE /comments/c/{commentId}
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(comment_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&comment_id, "comment")?;
    let user_id = user.id;

    let comment = run_db(&state, move |s| {
        let comment = owned_comment(s, id, user_id)?;
        s.db.delete_comment(id)?;
        Ok(comment)
    })
    .await?;

    Ok(ok("Comment deleted successfully", comment))
}
