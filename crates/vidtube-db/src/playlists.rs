use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use vidtube_types::models::PlaylistView;

use crate::Database;
use crate::models::{now_ts, ts_at, uuid_at};
use crate::read_models::playlist_videos;

/// Playlist header row, before its videos are resolved.
pub struct PlaylistRow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Database {
    pub fn create_playlist(&self, id: Uuid, owner: Uuid, name: &str, description: &str) -> Result<PlaylistView> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "INSERT INTO playlists (id, name, description, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id.to_string(), name, description, owner.to_string(), now],
            )?;
            query_playlist_view(conn, &id.to_string())?
                .ok_or_else(|| anyhow::anyhow!("Playlist {} vanished after insert", id))
        })
    }

    pub fn get_playlist(&self, id: Uuid) -> Result<Option<PlaylistRow>> {
        self.with_conn(|conn| query_playlist(conn, &id.to_string()))
    }

    /// Playlist with its videos resolved in playlist order.
    pub fn playlist_view(&self, id: Uuid) -> Result<Option<PlaylistView>> {
        self.with_conn(|conn| query_playlist_view(conn, &id.to_string()))
    }

    pub fn user_playlists(&self, owner: Uuid) -> Result<Vec<PlaylistView>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM playlists WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )?;
            let ids = stmt
                .query_map([owner.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut views = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(view) = query_playlist_view(conn, &id)? {
                    views.push(view);
                }
            }
            Ok(views)
        })
    }

    pub fn update_playlist(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<PlaylistView>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE playlists SET
                    name = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    updated_at = ?4
                 WHERE id = ?1",
                params![id.to_string(), name, description, now_ts()],
            )?;
            query_playlist_view(conn, &id.to_string())
        })
    }

    pub fn delete_playlist(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM playlists WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    /// Append a video. Duplicates are kept; membership is the caller's concern.
    pub fn push_playlist_video(&self, playlist_id: Uuid, video_id: Uuid) -> Result<Option<PlaylistView>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let pid = playlist_id.to_string();
            tx.execute(
                "INSERT INTO playlist_videos (playlist_id, position, video_id)
                 VALUES (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM playlist_videos WHERE playlist_id = ?1), ?2)",
                [&pid, &video_id.to_string()],
            )?;
            tx.execute(
                "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
                [&pid, &now_ts()],
            )?;
            let view = query_playlist_view(&tx, &pid)?;
            tx.commit()?;
            Ok(view)
        })
    }

    /// Remove every occurrence of the video from the playlist.
    pub fn pull_playlist_video(&self, playlist_id: Uuid, video_id: Uuid) -> Result<Option<PlaylistView>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let pid = playlist_id.to_string();
            tx.execute(
                "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
                [&pid, &video_id.to_string()],
            )?;
            tx.execute(
                "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
                [&pid, &now_ts()],
            )?;
            let view = query_playlist_view(&tx, &pid)?;
            tx.commit()?;
            Ok(view)
        })
    }
}

fn query_playlist(conn: &Connection, id: &str) -> Result<Option<PlaylistRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, description, owner_id, created_at, updated_at FROM playlists WHERE id = ?1",
            [id],
            |row| {
                Ok(PlaylistRow {
                    id: uuid_at(row, 0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    owner: uuid_at(row, 3)?,
                    created_at: ts_at(row, 4)?,
                    updated_at: ts_at(row, 5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn query_playlist_view(conn: &Connection, id: &str) -> Result<Option<PlaylistView>> {
    let Some(row) = query_playlist(conn, id)? else {
        return Ok(None);
    };
    let videos = playlist_videos(conn, id)?;
    Ok(Some(PlaylistView {
        id: row.id,
        name: row.name,
        description: row.description,
        owner: row.owner,
        videos,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}
