//! Database row types and column decoding helpers.
//! Rows that would leak credentials (password hash, refresh token) stay here;
//! everything safe to serialize is built directly as a vidtube-types model.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use vidtube_types::models::{AssetKind, OwnerProfile, User};

pub struct UserRow {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub password_hash: String,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_public(self) -> User {
        User {
            id: self.id,
            user_name: self.user_name,
            email: self.email,
            full_name: self.full_name,
            avatar: self.avatar,
            cover_image: self.cover_image,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub struct NewUser<'a> {
    pub id: Uuid,
    pub user_name: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
    pub avatar: &'a str,
    pub cover_image: Option<&'a str>,
    pub password_hash: &'a str,
}

pub struct NewVideo<'a> {
    pub id: Uuid,
    pub title: &'a str,
    pub description: &'a str,
    pub video_file: &'a str,
    pub thumbnail: &'a str,
    pub owner: Uuid,
    pub duration: f64,
}

/// Partial video update. `None` leaves the column untouched.
#[derive(Default)]
pub struct VideoUpdate<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub thumbnail: Option<&'a str>,
}

pub struct PendingAssetRow {
    pub id: Uuid,
    pub kind: AssetKind,
    pub url: Option<String>,
}

/// Current time in the same RFC 3339 millisecond format the schema defaults use.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode four `(id, user_name, full_name, avatar)` columns from a LEFT JOIN.
/// `None` when the join found no user.
pub(crate) fn owner_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OwnerProfile>> {
    let id: Option<String> = row.get(idx)?;
    let Some(id) = id else {
        return Ok(None);
    };
    let id = id
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))?;
    Ok(Some(OwnerProfile {
        id,
        user_name: row.get(idx + 1)?,
        full_name: row.get(idx + 2)?,
        avatar: row.get(idx + 3)?,
    }))
}

pub(crate) const USER_COLUMNS: &str = "id, user_name, email, full_name, avatar, cover_image, password, refresh_token, created_at, updated_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_at(row, 0)?,
        user_name: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        avatar: row.get(4)?,
        cover_image: row.get(5)?,
        password_hash: row.get(6)?,
        refresh_token: row.get(7)?,
        created_at: ts_at(row, 8)?,
        updated_at: ts_at(row, 9)?,
    })
}
