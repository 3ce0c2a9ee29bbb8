use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use vidtube_types::models::{Comment, Tweet, Video};

use crate::Database;
use crate::assets::clear_markers;
use crate::models::{
    NewUser, NewVideo, USER_COLUMNS, UserRow, VideoUpdate, now_ts, ts_at, user_from_row, uuid_at,
};

impl Database {
    // -- Users --

    /// Insert a user and, in the same transaction, release the pending-asset
    /// markers for the avatar/cover uploads that the row now references.
    pub fn create_user(&self, user: &NewUser<'_>, committed_assets: &[Uuid]) -> Result<UserRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_ts();
            tx.execute(
                "INSERT INTO users (id, user_name, email, full_name, avatar, cover_image, password, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    user.id.to_string(),
                    user.user_name,
                    user.email,
                    user.full_name,
                    user.avatar,
                    user.cover_image,
                    user.password_hash,
                    now,
                ],
            )?;
            clear_markers(&tx, committed_assets)?;
            let row = query_user_by_id(&tx, &user.id.to_string())?
                .ok_or_else(|| anyhow!("User {} vanished after insert", user.id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, &id.to_string()))
    }

    /// Look a user up by handle or email, whichever is given.
    pub fn find_user_for_login(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE (?1 IS NOT NULL AND user_name = ?1) OR (?2 IS NOT NULL AND email = ?2)
                 LIMIT 1"
            );
            Ok(conn.query_row(&sql, params![user_name, email], user_from_row).optional()?)
        })
    }

    pub fn user_name_or_email_taken(&self, user_name: &str, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE user_name = ?1 OR email = ?2)",
                [user_name, email],
                |row| row.get(0),
            )?;
            Ok(taken)
        })
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Overwrite (or clear, with `None`) the stored refresh token.
    pub fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
                params![id.to_string(), token],
            )?;
            Ok(())
        })
    }

    /// Swap the stored refresh token from `current` to `next`. Returns false
    /// when `current` is no longer the one on record, so a token can only
    /// ever be exchanged once.
    pub fn rotate_refresh_token(&self, id: Uuid, current: &str, next: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET refresh_token = ?3 WHERE id = ?1 AND refresh_token = ?2",
                params![id.to_string(), current, next],
            )?;
            Ok(changed == 1)
        })
    }

    /// Replace the password hash. Outstanding refresh tokens are revoked with it.
    pub fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2, refresh_token = NULL, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), password_hash, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn update_account(&self, id: Uuid, full_name: &str, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET full_name = ?2, email = ?3, updated_at = ?4 WHERE id = ?1",
                params![id.to_string(), full_name, email, now_ts()],
            )?;
            query_user_by_id(conn, &id.to_string())
        })
    }

    /// Point the avatar at a freshly uploaded asset. Returns the updated row
    /// and the previous avatar URL so the caller can delete it.
    pub fn replace_avatar(
        &self,
        id: Uuid,
        url: &str,
        marker: Uuid,
    ) -> Result<Option<(UserRow, Option<String>)>> {
        self.replace_user_image(id, "avatar", url, marker)
    }

    pub fn replace_cover_image(
        &self,
        id: Uuid,
        url: &str,
        marker: Uuid,
    ) -> Result<Option<(UserRow, Option<String>)>> {
        self.replace_user_image(id, "cover_image", url, marker)
    }

    fn replace_user_image(
        &self,
        id: Uuid,
        column: &'static str,
        url: &str,
        marker: Uuid,
    ) -> Result<Option<(UserRow, Option<String>)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let previous: Option<Option<String>> = tx
                .query_row(
                    &format!("SELECT {column} FROM users WHERE id = ?1"),
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(previous) = previous else {
                return Ok(None);
            };
            tx.execute(
                &format!("UPDATE users SET {column} = ?2, updated_at = ?3 WHERE id = ?1"),
                params![id.to_string(), url, now_ts()],
            )?;
            clear_markers(&tx, &[marker])?;
            let row = query_user_by_id(&tx, &id.to_string())?;
            tx.commit()?;
            Ok(row.map(|r| (r, previous.filter(|p| !p.is_empty()))))
        })
    }

    /// Append a video to the user's watch history. A video already present
    /// moves to the end rather than appearing twice.
    pub fn record_watch(&self, user_id: Uuid, video_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO watch_history (user_id, video_id, position)
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(position), 0) + 1 FROM watch_history WHERE user_id = ?1))
                 ON CONFLICT (user_id, video_id) DO UPDATE SET position = excluded.position",
                [user_id.to_string(), video_id.to_string()],
            )?;
            Ok(())
        })
    }

    // -- Videos --

    pub fn create_video(&self, video: &NewVideo<'_>, committed_assets: &[Uuid]) -> Result<Video> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_ts();
            tx.execute(
                "INSERT INTO videos (id, title, description, video_file, thumbnail, owner_id, duration, views, is_published, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 1, ?8, ?8)",
                params![
                    video.id.to_string(),
                    video.title,
                    video.description,
                    video.video_file,
                    video.thumbnail,
                    video.owner.to_string(),
                    video.duration,
                    now,
                ],
            )?;
            clear_markers(&tx, committed_assets)?;
            let row = query_video(&tx, &video.id.to_string())?
                .ok_or_else(|| anyhow!("Video {} vanished after insert", video.id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_video(&self, id: Uuid) -> Result<Option<Video>> {
        self.with_conn(|conn| query_video(conn, &id.to_string()))
    }

    /// Apply a partial update. When a new thumbnail is set, `marker` is the
    /// pending-asset marker released by this write.
    pub fn update_video(
        &self,
        id: Uuid,
        update: &VideoUpdate<'_>,
        marker: Option<Uuid>,
    ) -> Result<Option<Video>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE videos SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    thumbnail = COALESCE(?4, thumbnail),
                    updated_at = ?5
                 WHERE id = ?1",
                params![id.to_string(), update.title, update.description, update.thumbnail, now_ts()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            if let Some(marker) = marker {
                clear_markers(&tx, &[marker])?;
            }
            let row = query_video(&tx, &id.to_string())?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Flip `is_published` in a single statement. Returns the updated video.
    pub fn toggle_publish(&self, id: Uuid) -> Result<Option<Video>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE videos SET is_published = NOT is_published, updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), now_ts()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_video(conn, &id.to_string())
        })
    }

    pub fn increment_views(&self, id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE videos SET views = views + 1 WHERE id = ?1", [id.to_string()])?;
            Ok(())
        })
    }

    /// Delete a video along with every like pointing at it or at its comments.
    /// Comments, playlist entries and watch-history entries cascade.
    pub fn delete_video(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();
            tx.execute(
                "DELETE FROM likes WHERE target_kind = 'comment'
                   AND target_id IN (SELECT id FROM comments WHERE video_id = ?1)",
                [&id],
            )?;
            tx.execute(
                "DELETE FROM likes WHERE target_kind = 'video' AND target_id = ?1",
                [&id],
            )?;
            let deleted = tx.execute("DELETE FROM videos WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    // -- Comments --

    pub fn create_comment(&self, id: Uuid, video_id: Uuid, owner: Uuid, content: &str) -> Result<Comment> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "INSERT INTO comments (id, content, video_id, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id.to_string(), content, video_id.to_string(), owner.to_string(), now],
            )?;
            query_comment(conn, &id.to_string())?
                .ok_or_else(|| anyhow!("Comment {} vanished after insert", id))
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn(|conn| query_comment(conn, &id.to_string()))
    }

    pub fn update_comment(&self, id: Uuid, content: &str) -> Result<Option<Comment>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), content, now_ts()],
            )?;
            query_comment(conn, &id.to_string())
        })
    }

    pub fn delete_comment(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();
            tx.execute(
                "DELETE FROM likes WHERE target_kind = 'comment' AND target_id = ?1",
                [&id],
            )?;
            let deleted = tx.execute("DELETE FROM comments WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    // -- Tweets --

    pub fn create_tweet(&self, id: Uuid, owner: Uuid, content: &str) -> Result<Tweet> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "INSERT INTO tweets (id, content, owner_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.to_string(), content, owner.to_string(), now],
            )?;
            query_tweet(conn, &id.to_string())?
                .ok_or_else(|| anyhow!("Tweet {} vanished after insert", id))
        })
    }

    pub fn get_tweet(&self, id: Uuid) -> Result<Option<Tweet>> {
        self.with_conn(|conn| query_tweet(conn, &id.to_string()))
    }

    pub fn get_user_tweets(&self, owner: Uuid) -> Result<Vec<Tweet>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, owner_id, created_at, updated_at FROM tweets
                 WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([owner.to_string()], tweet_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_tweet(&self, id: Uuid, content: &str) -> Result<Option<Tweet>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tweets SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), content, now_ts()],
            )?;
            query_tweet(conn, &id.to_string())
        })
    }

    pub fn delete_tweet(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();
            tx.execute(
                "DELETE FROM likes WHERE target_kind = 'tweet' AND target_id = ?1",
                [&id],
            )?;
            let deleted = tx.execute("DELETE FROM tweets WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], user_from_row).optional()?)
}

pub(crate) const VIDEO_COLUMNS: &str = "v.id, v.title, v.description, v.video_file, v.thumbnail, v.owner_id, v.duration, v.views, v.is_published, v.created_at, v.updated_at";

pub(crate) fn video_from_row(row: &Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        video_file: row.get(3)?,
        thumbnail: row.get(4)?,
        owner: uuid_at(row, 5)?,
        duration: row.get(6)?,
        views: row.get(7)?,
        is_published: row.get(8)?,
        created_at: ts_at(row, 9)?,
        updated_at: ts_at(row, 10)?,
    })
}

fn query_video(conn: &Connection, id: &str) -> Result<Option<Video>> {
    let sql = format!("SELECT {VIDEO_COLUMNS} FROM videos v WHERE v.id = ?1");
    Ok(conn.query_row(&sql, [id], video_from_row).optional()?)
}

fn query_comment(conn: &Connection, id: &str) -> Result<Option<Comment>> {
    let row = conn
        .query_row(
            "SELECT id, content, video_id, owner_id, created_at, updated_at FROM comments WHERE id = ?1",
            [id],
            |row| {
                Ok(Comment {
                    id: uuid_at(row, 0)?,
                    content: row.get(1)?,
                    video: uuid_at(row, 2)?,
                    owner: uuid_at(row, 3)?,
                    created_at: ts_at(row, 4)?,
                    updated_at: ts_at(row, 5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn tweet_from_row(row: &Row<'_>) -> rusqlite::Result<Tweet> {
    Ok(Tweet {
        id: uuid_at(row, 0)?,
        content: row.get(1)?,
        owner: uuid_at(row, 2)?,
        created_at: ts_at(row, 3)?,
        updated_at: ts_at(row, 4)?,
    })
}

fn query_tweet(conn: &Connection, id: &str) -> Result<Option<Tweet>> {
    let row = conn
        .query_row(
            "SELECT id, content, owner_id, created_at, updated_at FROM tweets WHERE id = ?1",
            [id],
            tweet_from_row,
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::is_unique_violation;
    use crate::models::{NewUser, VideoUpdate};
    use crate::testing::{db, user, video};

    #[test]
    fn duplicate_user_name_is_a_unique_violation() {
        let db = db();
        user(&db, "alice");
        let err = db
            .create_user(
                &NewUser {
                    id: Uuid::new_v4(),
                    user_name: "alice",
                    email: "other@example.com",
                    full_name: "Other",
                    avatar: "https://media.test/a.png",
                    cover_image: None,
                    password_hash: "hash",
                },
                &[],
            )
            .err()
            .expect("duplicate insert must fail");
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn login_lookup_matches_either_handle_or_email() {
        let db = db();
        let alice = user(&db, "alice");

        let by_name = db.find_user_for_login(Some("alice"), None).unwrap().unwrap();
        assert_eq!(by_name.id, alice.id);

        let by_email = db.find_user_for_login(None, Some("alice@example.com")).unwrap().unwrap();
        assert_eq!(by_email.id, alice.id);

        assert!(db.find_user_for_login(None, None).unwrap().is_none());
        assert!(db.find_user_for_login(Some("bob"), None).unwrap().is_none());
    }

    #[test]
    fn refresh_token_can_be_set_and_cleared() {
        let db = db();
        let alice = user(&db, "alice");
        assert!(alice.refresh_token.is_none());

        db.set_refresh_token(alice.id, Some("tok")).unwrap();
        let stored = db.get_user_by_id(alice.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("tok"));

        db.set_refresh_token(alice.id, None).unwrap();
        let stored = db.get_user_by_id(alice.id).unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[test]
    fn refresh_token_rotates_only_from_the_stored_value() {
        let db = db();
        let alice = user(&db, "alice");
        db.set_refresh_token(alice.id, Some("first")).unwrap();

        assert!(db.rotate_refresh_token(alice.id, "first", "second").unwrap());
        // The same exchange a second time finds "second" on record.
        assert!(!db.rotate_refresh_token(alice.id, "first", "third").unwrap());

        let stored = db.get_user_by_id(alice.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("second"));

        db.set_refresh_token(alice.id, None).unwrap();
        assert!(!db.rotate_refresh_token(alice.id, "second", "fourth").unwrap());
    }

    #[test]
    fn password_change_revokes_refresh_token() {
        let db = db();
        let alice = user(&db, "alice");
        db.set_refresh_token(alice.id, Some("tok")).unwrap();

        db.update_password(alice.id, "new-hash").unwrap();

        let stored = db.get_user_by_id(alice.id).unwrap().unwrap();
        assert_eq!(stored.password_hash, "new-hash");
        assert!(stored.refresh_token.is_none());
    }

    #[test]
    fn toggle_publish_flips_flag() {
        let db = db();
        let alice = user(&db, "alice");
        let v = video(&db, alice.id, "first");
        assert!(v.is_published);

        assert!(!db.toggle_publish(v.id).unwrap().unwrap().is_published);
        assert!(db.toggle_publish(v.id).unwrap().unwrap().is_published);
        assert!(db.toggle_publish(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn partial_video_update_keeps_untouched_fields() {
        let db = db();
        let alice = user(&db, "alice");
        let v = video(&db, alice.id, "first");

        let updated = db
            .update_video(
                v.id,
                &VideoUpdate {
                    title: Some("renamed"),
                    ..Default::default()
                },
                None,
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.description, v.description);
        assert_eq!(updated.thumbnail, v.thumbnail);
    }

    #[test]
    fn deleting_video_cascades_to_comments() {
        let db = db();
        let alice = user(&db, "alice");
        let v = video(&db, alice.id, "first");
        let c = db.create_comment(Uuid::new_v4(), v.id, alice.id, "nice").unwrap();

        assert!(db.delete_video(v.id).unwrap());
        assert!(db.get_comment(c.id).unwrap().is_none());
        assert!(!db.delete_video(v.id).unwrap());
    }
}
