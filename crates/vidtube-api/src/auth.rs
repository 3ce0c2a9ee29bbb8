use std::time::Duration;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension,
    body::Bytes,
    extract::{Multipart, State},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{info, warn};
use uuid::Uuid;

use vidtube_db::is_unique_violation;
use vidtube_db::models::NewUser;
use vidtube_types::api::{ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, TokenPairResponse};
use vidtube_types::models::{AssetKind, User};

use crate::assets::{TrackedUpload, compensate, upload_tracked};
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, required};
use crate::response::{created, ok};
use crate::session::{SessionManager, TokenPair};
use crate::staging::MultipartForm;
use crate::state::{AppState, run_db};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

pub(crate) fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub(crate) fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("stored hash is malformed: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn auth_cookie(name: &'static str, value: String, secure: bool, ttl: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX))
        .build()
}

/// Both cookies expire together with the token they carry.
fn with_token_cookies(jar: CookieJar, pair: &TokenPair, sessions: &SessionManager, secure: bool) -> CookieJar {
    jar.add(auth_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure, sessions.access_ttl()))
        .add(auth_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure, sessions.refresh_ttl()))
}

fn without_token_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

/// POST /users/register (multipart): fullName, userName, email, password,
/// avatar (required), coverImage (optional).
pub async fn register(State(state): State<AppState>, multipart: Multipart) -> ApiResult<impl IntoResponse> {
    let mut form = MultipartForm::read(multipart, &state.temp_dir).await?;

    let full_name = required(form.text("fullName"), "fullName")?.to_string();
    let user_name = required(form.text("userName"), "userName")?.to_lowercase();
    let email = required(form.text("email"), "email")?.to_lowercase();
    let password = required(form.text("password"), "password")?.to_string();

    let (name_q, email_q) = (user_name.clone(), email.clone());
    let taken = run_db(&state, move |s| Ok(s.db.user_name_or_email_taken(&name_q, &email_q)?)).await?;
    if taken {
        return Err(ApiError::conflict("User with email or username already exists"));
    }

    let avatar_file = form
        .take_file("avatar")
        .ok_or_else(|| ApiError::bad_request("Avatar file is required"))?;
    let cover_file = form.take_file("coverImage");

    let avatar = upload_tracked(&state, avatar_file, AssetKind::Image)
        .await
        .map_err(|_| ApiError::bad_request("Avatar file is required"))?;

    let cover = match cover_file {
        Some(file) => match upload_tracked(&state, file, AssetKind::Image).await {
            Ok(upload) => Some(upload),
            Err(e) => {
                warn!("Cover image upload for {} failed, continuing without: {}", user_name, e);
                None
            }
        },
        None => None,
    };

    let uploads: Vec<TrackedUpload> = std::iter::once(avatar.clone()).chain(cover.clone()).collect();
    let markers: Vec<Uuid> = uploads.iter().map(|u| u.marker).collect();

    let result = run_db(&state, move |s| {
        let password_hash = hash_password(&password)?;
        let row = s.db.create_user(
            &NewUser {
                id: Uuid::new_v4(),
                user_name: &user_name,
                email: &email,
                full_name: &full_name,
                avatar: &avatar.url,
                cover_image: cover.as_ref().map(|c| c.url.as_str()),
                password_hash: &password_hash,
            },
            &markers,
        );
        match row {
            Ok(row) => Ok(row),
            Err(e) if is_unique_violation(&e) => {
                Err(ApiError::conflict("User with email or username already exists"))
            }
            Err(e) => Err(e.into()),
        }
    })
    .await;

    let user = match result {
        Ok(row) => row.into_public(),
        Err(e) => {
            compensate(&state, &uploads).await;
            return Err(e);
        }
    };

    info!("User registered: {} ({})", user.user_name, user.id);
    Ok(created("User registered successfully", user))
}

/// POST /users/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_name = req
        .user_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    if user_name.is_none() && email.is_none() {
        return Err(ApiError::bad_request("username or email is required"));
    }

    let (user, pair) = run_db(&state, move |s| {
        let row = s
            .db
            .find_user_for_login(user_name.as_deref(), email.as_deref())?
            .ok_or_else(|| ApiError::not_found("User does not exist"))?;
        if !verify_password(&req.password, &row.password_hash)? {
            return Err(ApiError::unauthorized("Invalid user credentials"));
        }
        let pair = s.sessions.issue_token_pair(&s.db, &row)?;
        Ok((row.into_public(), pair))
    })
    .await?;

    info!("User logged in: {}", user.user_name);
    let jar = with_token_cookies(jar, &pair, &state.sessions, state.cookie_secure);
    Ok((
        jar,
        ok(
            "User logged in successfully",
            LoginResponse {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
        ),
    ))
}

/// POST /users/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    jar: CookieJar,
) -> ApiResult<impl IntoResponse> {
    let user_id = user.id;
    run_db(&state, move |s| Ok(s.sessions.revoke(&s.db, user_id)?)).await?;

    info!("User logged out: {}", user.user_name);
    Ok((without_token_cookies(jar), ok("User logged out", serde_json::json!({}))))
}

/// POST /users/refresh-token: the refresh token comes from the cookie or
/// the JSON body's `refreshToken`.
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        RefreshRequest::default()
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or(from_body.refresh_token);

    let pair = run_db(&state, move |s| {
        let (_, pair) = s.sessions.renew(&s.db, token.as_deref())?;
        Ok(pair)
    })
    .await?;

    let jar = with_token_cookies(jar, &pair, &state.sessions, state.cookie_secure);
    Ok((
        jar,
        ok(
            "Access token refreshed",
            TokenPairResponse {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
        ),
    ))
}

/// POST /users/change-password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.new_password.trim().is_empty() {
        return Err(ApiError::bad_request("newPassword is required"));
    }

    let user_id = user.id;
    run_db(&state, move |s| {
        let row = s
            .db
            .get_user_by_id(user_id)?
            .ok_or_else(|| ApiError::unauthorized("Invalid access token"))?;
        if !verify_password(&req.old_password, &row.password_hash)? {
            return Err(ApiError::bad_request("Invalid old password"));
        }
        let hash = hash_password(&req.new_password)?;
        s.db.update_password(user_id, &hash)?;
        Ok(())
    })
    .await?;

    info!("Password changed for {}", user.user_name);
    Ok(ok("Password changed successfully", serde_json::json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }

    #[test]
    fn token_cookies_are_http_only_and_expire_with_their_tokens() {
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let sessions = SessionManager::new(&SessionConfig {
            access_secret: "access".into(),
            refresh_secret: "refresh".into(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(86_400),
        });
        let jar = with_token_cookies(CookieJar::new(), &pair, &sessions, true);
        let access = jar.get(ACCESS_COOKIE).unwrap();
        assert_eq!(access.value(), "a");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.secure(), Some(true));
        assert_eq!(access.path(), Some("/"));
        assert_eq!(access.max_age(), Some(time::Duration::seconds(900)));

        let refresh = jar.get(REFRESH_COOKIE).unwrap();
        assert_eq!(refresh.value(), "r");
        assert_eq!(refresh.max_age(), Some(time::Duration::seconds(86_400)));
    }
}
