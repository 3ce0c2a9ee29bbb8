use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use vidtube_db::playlists::PlaylistRow;
use vidtube_types::api::{CreatePlaylistRequest, UpdatePlaylistRequest};
use vidtube_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, optional, parse_id, required};
use crate::response::{created, ok};
use crate::state::{AppState, AppStateInner, run_db};
use crate::videos::visible_video;

fn owned_playlist(s: &AppStateInner, id: Uuid, user_id: Uuid) -> ApiResult<PlaylistRow> {
    let playlist = s
        .db
        .get_playlist(id)?
        .ok_or_else(|| ApiError::not_found("Playlist not found"))?;
    if playlist.owner != user_id {
        return Err(ApiError::forbidden("You are not the owner of this playlist"));
    }
    Ok(playlist)
}

/// POST /playlist
pub async fn create_playlist(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<CreatePlaylistRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = required(Some(&req.name), "name")?.to_string();
    let description = required(Some(&req.description), "description")?.to_string();
    let owner = user.id;

    let playlist = run_db(&state, move |s| {
        Ok(s.db.create_playlist(Uuid::new_v4(), owner, &name, &description)?)
    })
    .await?;

    Ok(created("Playlist created successfully", playlist))
}

/// GET /playlist/user/{userId}
pub async fn user_playlists(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let owner = parse_id(&user_id, "user")?;
    let playlists = run_db(&state, move |s| {
        if !s.db.user_exists(owner)? {
            return Err(ApiError::not_found("User not found"));
        }
        Ok(s.db.user_playlists(owner)?)
    })
    .await?;

    Ok(ok("Playlists fetched successfully", playlists))
}

/// GET /playlist/{playlistId}
pub async fn get_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&playlist_id, "playlist")?;
    let playlist = run_db(&state, move |s| {
        s.db.playlist_view(id)?
            .ok_or_else(|| ApiError::not_found("Playlist not found"))
    })
    .await?;

    Ok(ok("Playlist fetched successfully", playlist))
}

/// PATCH /playlist/{playlistId}
pub async fn update_playlist(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(playlist_id): Path<String>,
    ApiJson(req): ApiJson<UpdatePlaylistRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&playlist_id, "playlist")?;
    let name = optional(req.name.as_deref(), "name")?.map(str::to_string);
    let description = optional(req.description.as_deref(), "description")?.map(str::to_string);
    if name.is_none() && description.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let user_id = user.id;
    let playlist = run_db(&state, move |s| {
        owned_playlist(s, id, user_id)?;
        s.db.update_playlist(id, name.as_deref(), description.as_deref())?
            .ok_or_else(|| ApiError::not_found("Playlist not found"))
    })
    .await?;

    Ok(ok("Playlist updated successfully", playlist))
}

/// DELETE /playlist/{playlistId}
pub async fn delete_playlist(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(playlist_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&playlist_id, "playlist")?;
    let user_id = user.id;
    run_db(&state, move |s| {
        owned_playlist(s, id, user_id)?;
        s.db.delete_playlist(id)?;
        Ok(())
    })
    .await?;

    Ok(ok("Playlist deleted successfully", serde_json::json!({})))
}

/// PATCH /playlist/add/{videoId}/{playlistId}
pub async fn add_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let video = parse_id(&video_id, "video")?;
    let playlist = parse_id(&playlist_id, "playlist")?;
    let user_id = user.id;

    let view = run_db(&state, move |s| {
        owned_playlist(s, playlist, user_id)?;
        visible_video(s, video, user_id)?;
        s.db.push_playlist_video(playlist, video)?
            .ok_or_else(|| ApiError::not_found("Playlist not found"))
    })
    .await?;

    Ok(ok("Video added to playlist successfully", view))
}

/// PATCH /playlist/remove/{videoId}/{playlistId}
pub async fn remove_video(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let video = parse_id(&video_id, "video")?;
    let playlist = parse_id(&playlist_id, "playlist")?;
    let user_id = user.id;

    let view = run_db(&state, move |s| {
        owned_playlist(s, playlist, user_id)?;
        s.db.pull_playlist_video(playlist, video)?
            .ok_or_else(|| ApiError::not_found("Playlist not found"))
    })
    .await?;

    Ok(ok("Video removed from playlist successfully", view))
}
