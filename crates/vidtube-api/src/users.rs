use axum::{
    Extension,
    extract::{Multipart, Path, State},
    response::IntoResponse,
};
use tracing::{info, warn};

use vidtube_db::is_unique_violation;
use vidtube_db::models::UserRow;
use vidtube_types::api::UpdateAccountRequest;
use vidtube_types::models::{AssetKind, User};

use crate::assets::{compensate, upload_tracked};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, required};
use crate::response::ok;
use crate::staging::MultipartForm;
use crate::state::{AppState, run_db};

/// GET /users/current-user
pub async fn current_user(Extension(user): Extension<User>) -> ApiResult<impl IntoResponse> {
    Ok(ok("Current user fetched successfully", user))
}

/// PATCH /users/update-account
pub async fn update_account(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<UpdateAccountRequest>,
) -> ApiResult<impl IntoResponse> {
    let full_name = required(Some(&req.full_name), "fullName")?.to_string();
    let email = required(Some(&req.email), "email")?.to_lowercase();

    let user_id = user.id;
    let updated = run_db(&state, move |s| match s.db.update_account(user_id, &full_name, &email) {
        Ok(Some(row)) => Ok(row.into_public()),
        Ok(None) => Err(ApiError::not_found("User not found")),
        Err(e) if is_unique_violation(&e) => Err(ApiError::conflict("Email is already in use")),
        Err(e) => Err(e.into()),
    })
    .await?;

    Ok(ok("Account details updated successfully", updated))
}

#[derive(Clone, Copy)]
enum ProfileImage {
    Avatar,
    Cover,
}

impl ProfileImage {
    fn field(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Cover => "coverImage",
        }
    }
}

/// Upload a new avatar or cover image, point the user at it, then delete
/// the image it replaced.
async fn replace_image(
    state: &AppState,
    user: &User,
    multipart: Multipart,
    which: ProfileImage,
) -> ApiResult<User> {
    let mut form = MultipartForm::read(multipart, &state.temp_dir).await?;
    let file = form
        .take_file(which.field())
        .ok_or_else(|| ApiError::bad_request(format!("{} file is missing", which.field())))?;

    let upload = upload_tracked(state, file, AssetKind::Image)
        .await
        .map_err(|_| ApiError::bad_request(format!("Error while uploading {}", which.field())))?;

    let (user_id, url, marker) = (user.id, upload.url.clone(), upload.marker);
    let result = run_db(state, move |s| {
        let replaced = match which {
            ProfileImage::Avatar => s.db.replace_avatar(user_id, &url, marker)?,
            ProfileImage::Cover => s.db.replace_cover_image(user_id, &url, marker)?,
        };
        replaced.ok_or_else(|| ApiError::not_found("User not found"))
    })
    .await;

    let (row, previous): (UserRow, Option<String>) = match result {
        Ok(pair) => pair,
        Err(e) => {
            compensate(state, &[upload]).await;
            return Err(e);
        }
    };

    if let Some(previous) = previous {
        if let Err(e) = state.media.delete(&previous, AssetKind::Image).await {
            warn!("Failed to delete replaced {} {}: {:#}", which.field(), previous, e);
        }
    }

    Ok(row.into_public())
}

/// PATCH /users/avatar
pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let updated = replace_image(&state, &user, multipart, ProfileImage::Avatar).await?;
    Ok(ok("Avatar updated successfully", updated))
}

/// PATCH /users/cover-image
pub async fn update_cover_image(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let updated = replace_image(&state, &user, multipart, ProfileImage::Cover).await?;
    Ok(ok("Cover image updated successfully", updated))
}

/// GET /users/channel/{userName}
pub async fn channel_profile(
    State(state): State<AppState>,
    Extension(viewer): Extension<User>,
    Path(user_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_name = required(Some(&user_name), "userName")?.to_lowercase();
    let viewer_id = viewer.id;
    let profile = run_db(&state, move |s| {
        s.db.channel_profile(&user_name, Some(viewer_id))?
            .ok_or_else(|| ApiError::not_found("Channel does not exist"))
    })
    .await?;

    Ok(ok("User channel fetched successfully", profile))
}

/// GET /users/watch-history
pub async fn watch_history(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user.id;
    let history = run_db(&state, move |s| Ok(s.db.watch_history(user_id)?)).await?;
    info!("Watch history fetched for {} ({} entries)", user.user_name, history.len());
    Ok(ok("Watch history fetched successfully", history))
}
