use axum::{
    Extension,
    extract::{Multipart, Path, State},
    response::IntoResponse,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use vidtube_db::models::{NewVideo, VideoUpdate};
use vidtube_db::read_models::{VideoListFilter, VideoSort};
use vidtube_types::api::{PageQuery, VideoListQuery};
use vidtube_types::models::{AssetKind, User, Video};

use crate::assets::{compensate, upload_tracked};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, optional, parse_id, required};
use crate::response::{created, ok};
use crate::staging::MultipartForm;
use crate::state::{AppState, AppStateInner, run_db};

/// Load a video the caller is about to modify. Absent is 404, someone
/// else's is 403.
pub(crate) fn owned_video(s: &AppStateInner, id: Uuid, user_id: Uuid) -> ApiResult<Video> {
    let video = s
        .db
        .get_video(id)?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    if video.owner != user_id {
        return Err(ApiError::forbidden("You are not the owner of this video"));
    }
    Ok(video)
}

/// Load a video the caller may see. Unpublished videos exist only for
/// their owner; to anyone else they are 404.
pub(crate) fn visible_video(s: &AppStateInner, id: Uuid, viewer: Uuid) -> ApiResult<Video> {
    match s.db.get_video(id)? {
        Some(video) if video.is_published || video.owner == viewer => Ok(video),
        _ => Err(ApiError::not_found("Video not found")),
    }
}

/// GET /videos
pub async fn list_videos(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiQuery(query): ApiQuery<VideoListQuery>,
) -> ApiResult<impl IntoResponse> {
    let sort = match query.sort_by.as_deref() {
        None | Some("") => VideoSort::default(),
        Some(s) => VideoSort::parse(s).ok_or_else(|| ApiError::bad_request(format!("Invalid sortBy: {s}")))?,
    };
    let ascending = match query.sort_type.as_deref() {
        None | Some("") | Some("desc") => false,
        Some("asc") => true,
        Some(other) => return Err(ApiError::bad_request(format!("Invalid sortType: {other}"))),
    };
    let owner = match query.user_id.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(parse_id(raw, "user")?),
    };
    let defaults = PageQuery::default();
    let filter = VideoListFilter {
        text: query.query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty()),
        owner,
        viewer: Some(user.id),
        sort,
        ascending,
        page: PageQuery {
            page: query.page.unwrap_or(defaults.page),
            limit: query.limit.unwrap_or(defaults.limit),
        }
        .normalized(),
    };

    let page = run_db(&state, move |s| Ok(s.db.list_videos(&filter)?)).await?;
    Ok(ok("Videos fetched successfully", page))
}

/// POST /videos (multipart): title, description, videoFile, thumbnail.
pub async fn publish_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = MultipartForm::read(multipart, &state.temp_dir).await?;
    let title = required(form.text("title"), "title")?.to_string();
    let description = required(form.text("description"), "description")?.to_string();

    let video_file = form
        .take_file("videoFile")
        .ok_or_else(|| ApiError::bad_request("Video file is required"))?;
    let thumbnail_file = form
        .take_file("thumbnail")
        .ok_or_else(|| ApiError::bad_request("Thumbnail is required"))?;

    let video_upload = upload_tracked(&state, video_file, AssetKind::Video).await?;
    let thumbnail_upload = match upload_tracked(&state, thumbnail_file, AssetKind::Image).await {
        Ok(upload) => upload,
        Err(e) => {
            compensate(&state, &[video_upload]).await;
            return Err(e);
        }
    };

    let uploads = [video_upload.clone(), thumbnail_upload.clone()];
    let owner = user.id;
    let result = run_db(&state, move |s| {
        let video = s.db.create_video(
            &NewVideo {
                id: Uuid::new_v4(),
                title: &title,
                description: &description,
                video_file: &video_upload.url,
                thumbnail: &thumbnail_upload.url,
                owner,
                duration: video_upload.duration.unwrap_or(0.0),
            },
            &[video_upload.marker, thumbnail_upload.marker],
        )?;
        Ok(video)
    })
    .await;

    match result {
        Ok(video) => {
            info!("Video published: {} by {}", video.id, user.user_name);
            Ok(created("Video published successfully", video))
        }
        Err(e) => {
            compensate(&state, &uploads).await;
            Err(e)
        }
    }
}

/// GET /videos/{videoId}: counts a view and records it in the viewer's
/// watch history.
pub async fn get_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&video_id, "video")?;
    let viewer = user.id;

    let video = run_db(&state, move |s| {
        visible_video(s, id, viewer)?;
        s.db.increment_views(id)?;
        s.db.record_watch(viewer, id)?;
        s.db.video_with_owner(id)?
            .ok_or_else(|| ApiError::not_found("Video not found"))
    })
    .await?;

    Ok(ok("Video fetched successfully", video))
}

/// PATCH /videos/{videoId} (multipart): title?, description?, thumbnail?.
pub async fn update_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&video_id, "video")?;
    let mut form = MultipartForm::read(multipart, &state.temp_dir).await?;
    let title = optional(form.text("title"), "title")?.map(str::to_string);
    let description = optional(form.text("description"), "description")?.map(str::to_string);
    let thumbnail_file = form.take_file("thumbnail");

    if title.is_none() && description.is_none() && thumbnail_file.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let user_id = user.id;
    let current = run_db(&state, move |s| owned_video(s, id, user_id)).await?;

    let thumbnail_upload = match thumbnail_file {
        Some(file) => Some(upload_tracked(&state, file, AssetKind::Image).await?),
        None => None,
    };

    let pending = thumbnail_upload.clone();
    let result = run_db(&state, move |s| {
        let update = VideoUpdate {
            title: title.as_deref(),
            description: description.as_deref(),
            thumbnail: pending.as_ref().map(|u| u.url.as_str()),
        };
        s.db.update_video(id, &update, pending.as_ref().map(|u| u.marker))?
            .ok_or_else(|| ApiError::not_found("Video not found"))
    })
    .await;

    let updated = match result {
        Ok(video) => video,
        Err(e) => {
            if let Some(upload) = thumbnail_upload {
                compensate(&state, &[upload]).await;
            }
            return Err(e);
        }
    };

    if thumbnail_upload.is_some() {
        if let Err(e) = state.media.delete(&current.thumbnail, AssetKind::Image).await {
            warn!("Failed to delete replaced thumbnail {}: {:#}", current.thumbnail, e);
        }
    }

    Ok(ok("Video updated successfully", updated))
}

/// DELETE /videos/{videoId}: both assets go first; the row is only removed
/// once the media host confirmed both deletes.
pub async fn delete_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&video_id, "video")?;
    let user_id = user.id;
    let video = run_db(&state, move |s| owned_video(s, id, user_id)).await?;

    if let Err(e) = state.media.delete(&video.video_file, AssetKind::Video).await {
        error!("Failed to delete video file {}: {:#}", video.video_file, e);
        return Err(ApiError::internal("Failed to delete video file"));
    }
    if let Err(e) = state.media.delete(&video.thumbnail, AssetKind::Image).await {
        error!("Failed to delete thumbnail {}: {:#}", video.thumbnail, e);
        return Err(ApiError::internal("Failed to delete thumbnail"));
    }

    run_db(&state, move |s| {
        if s.db.delete_video(id)? {
            Ok(())
        } else {
            Err(ApiError::not_found("Video not found"))
        }
    })
    .await?;

    info!("Video deleted: {} by {}", id, user.user_name);
    Ok(ok("Video deleted successfully", video))
}

/// PATCH /videos/toggle/publish/{videoId}
pub async fn toggle_publish(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&video_id, "video")?;
    let user_id = user.id;
    let video = run_db(&state, move |s| {
        owned_video(s, id, user_id)?;
        s.db.toggle_publish(id)?
            .ok_or_else(|| ApiError::not_found("Video not found"))
    })
    .await?;

    Ok(ok("Publish status toggled successfully", video))
}
