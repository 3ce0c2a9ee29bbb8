//! Joined, denormalized views for read endpoints.
//!
//! Relations that must resolve to exactly one row (a video's or comment's
//! owner) are fetched with a LEFT JOIN and turned into an error when the join
//! comes back empty, so a dangling reference is reported rather than silently
//! dropped. Counted one-to-many relations (subscribers) default to zero.

use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use vidtube_types::api::{Page, PageQuery};
use vidtube_types::models::{
    ChannelProfile, CommentWithOwner, DashboardStats, OwnerProfile, SubscribedChannelEntry,
    SubscriberEntry, VideoWithOwner,
};

use crate::Database;
use crate::models::{owner_at, ts_at, uuid_at};

/// Video columns followed by the owner's public profile columns. Callers
/// alias the video table as `v` and LEFT JOIN users as `o`.
const VIDEO_WITH_OWNER_COLUMNS: &str = "v.id, v.title, v.description, v.video_file, v.thumbnail, v.duration, v.views, v.is_published, v.created_at, v.updated_at, o.id, o.user_name, o.full_name, o.avatar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoSort {
    #[default]
    CreatedAt,
    Views,
    Duration,
    Title,
}

impl VideoSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "createdAt" => Some(Self::CreatedAt),
            "views" => Some(Self::Views),
            "duration" => Some(Self::Duration),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "v.created_at",
            Self::Views => "v.views",
            Self::Duration => "v.duration",
            Self::Title => "v.title",
        }
    }
}

/// Filter for the public video listing.
#[derive(Debug, Clone, Default)]
pub struct VideoListFilter {
    /// Substring matched against title and description.
    pub text: Option<String>,
    pub owner: Option<Uuid>,
    /// The requester; their own unpublished videos are included.
    pub viewer: Option<Uuid>,
    pub sort: VideoSort,
    pub ascending: bool,
    pub page: PageQuery,
}

struct PendingVideo {
    video: VideoWithOwnerParts,
    owner: Option<OwnerProfile>,
}

struct VideoWithOwnerParts {
    id: Uuid,
    title: String,
    description: String,
    video_file: String,
    thumbnail: String,
    duration: f64,
    views: i64,
    is_published: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn video_with_owner_at(row: &Row<'_>, base: usize) -> rusqlite::Result<PendingVideo> {
    Ok(PendingVideo {
        video: VideoWithOwnerParts {
            id: uuid_at(row, base)?,
            title: row.get(base + 1)?,
            description: row.get(base + 2)?,
            video_file: row.get(base + 3)?,
            thumbnail: row.get(base + 4)?,
            duration: row.get(base + 5)?,
            views: row.get(base + 6)?,
            is_published: row.get(base + 7)?,
            created_at: ts_at(row, base + 8)?,
            updated_at: ts_at(row, base + 9)?,
        },
        owner: owner_at(row, base + 10)?,
    })
}

impl PendingVideo {
    /// Collapse the owner join to a single embedded profile.
    fn resolve(self) -> Result<VideoWithOwner> {
        let v = self.video;
        let owner = self
            .owner
            .ok_or_else(|| anyhow!("Video {} references a missing owner", v.id))?;
        Ok(VideoWithOwner {
            id: v.id,
            title: v.title,
            description: v.description,
            video_file: v.video_file,
            thumbnail: v.thumbnail,
            owner,
            duration: v.duration,
            views: v.views,
            is_published: v.is_published,
            created_at: v.created_at,
            updated_at: v.updated_at,
        })
    }
}

fn collect_videos(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<VideoWithOwner>> {
    let mut stmt = conn.prepare(sql)?;
    let pending = stmt
        .query_map(params, |row| video_with_owner_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    pending.into_iter().map(PendingVideo::resolve).collect()
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

impl Database {
    /// Channel profile by handle, with subscriber counts and whether `viewer`
    /// is among the subscribers.
    pub fn channel_profile(&self, user_name: &str, viewer: Option<Uuid>) -> Result<Option<ChannelProfile>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.user_name, u.full_name, u.email, u.avatar, u.cover_image,
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id),
                        (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id),
                        EXISTS(SELECT 1 FROM subscriptions s WHERE s.channel_id = u.id AND s.subscriber_id = ?2)
                     FROM users u WHERE u.user_name = ?1",
                    params![user_name, viewer.map(|v| v.to_string())],
                    |row| {
                        Ok(ChannelProfile {
                            id: uuid_at(row, 0)?,
                            user_name: row.get(1)?,
                            full_name: row.get(2)?,
                            email: row.get(3)?,
                            avatar: row.get(4)?,
                            cover_image: row.get(5)?,
                            subscribers_count: row.get(6)?,
                            channels_subscribed_to_count: row.get(7)?,
                            is_subscribed: row.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// The user's watch history as full videos, oldest watch first.
    pub fn watch_history(&self, user_id: Uuid) -> Result<Vec<VideoWithOwner>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {VIDEO_WITH_OWNER_COLUMNS}
                 FROM watch_history w
                 JOIN videos v ON v.id = w.video_id
                 LEFT JOIN users o ON o.id = v.owner_id
                 WHERE w.user_id = ?1
                 ORDER BY w.position"
            );
            collect_videos(conn, &sql, [user_id.to_string()])
        })
    }

    pub fn video_with_owner(&self, id: Uuid) -> Result<Option<VideoWithOwner>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {VIDEO_WITH_OWNER_COLUMNS}
                 FROM videos v LEFT JOIN users o ON o.id = v.owner_id
                 WHERE v.id = ?1"
            );
            Ok(collect_videos(conn, &sql, [id.to_string()])?.into_iter().next())
        })
    }

    /// Every video the channel owns, published or not, newest first.
    pub fn channel_videos(&self, owner: Uuid) -> Result<Vec<VideoWithOwner>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {VIDEO_WITH_OWNER_COLUMNS}
                 FROM videos v LEFT JOIN users o ON o.id = v.owner_id
                 WHERE v.owner_id = ?1
                 ORDER BY v.created_at DESC, v.rowid DESC"
            );
            collect_videos(conn, &sql, [owner.to_string()])
        })
    }

    /// Videos the user has liked, most recent like first.
    pub fn liked_videos(&self, user_id: Uuid) -> Result<Vec<VideoWithOwner>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {VIDEO_WITH_OWNER_COLUMNS}
                 FROM likes l
                 JOIN videos v ON l.target_kind = 'video' AND v.id = l.target_id
                 LEFT JOIN users o ON o.id = v.owner_id
                 WHERE l.liked_by = ?1
                 ORDER BY l.created_at DESC, l.rowid DESC"
            );
            collect_videos(conn, &sql, [user_id.to_string()])
        })
    }

    pub fn list_videos(&self, filter: &VideoListFilter) -> Result<Page<VideoWithOwner>> {
        let page = filter.page.normalized();
        let text = filter
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(escape_like);
        let owner = filter.owner.map(|o| o.to_string());
        let viewer = filter.viewer.map(|v| v.to_string());
        let order = if filter.ascending { "ASC" } else { "DESC" };

        let where_clause = "WHERE (v.is_published = 1 OR v.owner_id = ?3)
               AND (?1 IS NULL OR v.title LIKE ?1 ESCAPE '\\' OR v.description LIKE ?1 ESCAPE '\\')
               AND (?2 IS NULL OR v.owner_id = ?2)";

        self.with_conn(|conn| {
            let total = count(
                conn,
                &format!("SELECT COUNT(*) FROM videos v {where_clause}"),
                params![text, owner, viewer],
            )?;
            let sql = format!(
                "SELECT {VIDEO_WITH_OWNER_COLUMNS}
                 FROM videos v LEFT JOIN users o ON o.id = v.owner_id
                 {where_clause}
                 ORDER BY {} {order}, v.rowid {order}
                 LIMIT ?4 OFFSET ?5",
                filter.sort.column()
            );
            let docs = collect_videos(
                conn,
                &sql,
                params![text, owner, viewer, page.limit, page.offset() as i64],
            )?;
            Ok(Page::new(docs, total, page.page, page.limit))
        })
    }

    /// Comments on a video with each owner's public profile, newest first.
    pub fn comments_page(&self, video_id: Uuid, page: PageQuery) -> Result<Page<CommentWithOwner>> {
        let page = page.normalized();
        self.with_conn(|conn| {
            let total = count(
                conn,
                "SELECT COUNT(*) FROM comments WHERE video_id = ?1",
                [video_id.to_string()],
            )?;
            let mut stmt = conn.prepare(
                "SELECT c.id, c.content, c.video_id, c.created_at, c.updated_at,
                        o.id, o.user_name, o.full_name, o.avatar
                 FROM comments c LEFT JOIN users o ON o.id = c.owner_id
                 WHERE c.video_id = ?1
                 ORDER BY c.created_at DESC, c.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(
                    params![video_id.to_string(), page.limit, page.offset() as i64],
                    |row| {
                        Ok((
                            uuid_at(row, 0)?,
                            row.get::<_, String>(1)?,
                            uuid_at(row, 2)?,
                            ts_at(row, 3)?,
                            ts_at(row, 4)?,
                            owner_at(row, 5)?,
                        ))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let docs = rows
                .into_iter()
                .map(|(id, content, video, created_at, updated_at, owner)| {
                    let owner = owner.ok_or_else(|| anyhow!("Comment {} references a missing owner", id))?;
                    Ok(CommentWithOwner {
                        id,
                        content,
                        video,
                        owner,
                        created_at,
                        updated_at,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Page::new(docs, total, page.page, page.limit))
        })
    }

    pub fn subscribers_page(&self, channel: Uuid, page: PageQuery) -> Result<Page<SubscriberEntry>> {
        let page = page.normalized();
        self.with_conn(|conn| {
            let total = count(
                conn,
                "SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?1",
                [channel.to_string()],
            )?;
            let rows = subscription_rows(conn, "subscriber_id", "channel_id", channel, page)?;
            let docs = rows
                .into_iter()
                .map(|(subscription_id, subscribed_at, profile)| SubscriberEntry {
                    subscription_id,
                    subscriber: profile,
                    subscribed_at,
                })
                .collect();
            Ok(Page::new(docs, total, page.page, page.limit))
        })
    }

    pub fn subscribed_channels_page(
        &self,
        subscriber: Uuid,
        page: PageQuery,
    ) -> Result<Page<SubscribedChannelEntry>> {
        let page = page.normalized();
        self.with_conn(|conn| {
            let total = count(
                conn,
                "SELECT COUNT(*) FROM subscriptions WHERE subscriber_id = ?1",
                [subscriber.to_string()],
            )?;
            let rows = subscription_rows(conn, "channel_id", "subscriber_id", subscriber, page)?;
            let docs = rows
                .into_iter()
                .map(|(subscription_id, subscribed_at, profile)| SubscribedChannelEntry {
                    subscription_id,
                    channel: profile,
                    subscribed_at,
                })
                .collect();
            Ok(Page::new(docs, total, page.page, page.limit))
        })
    }

    /// Channel totals: views and count of its videos, subscribers, and likes
    /// on any of its videos.
    pub fn dashboard_stats(&self, owner: Uuid) -> Result<DashboardStats> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT
                    (SELECT COALESCE(SUM(views), 0) FROM videos WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM videos WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?1),
                    (SELECT COUNT(*) FROM likes l
                        JOIN videos v ON l.target_kind = 'video' AND v.id = l.target_id
                        WHERE v.owner_id = ?1)",
                [owner.to_string()],
                |row| {
                    Ok(DashboardStats {
                        total_views: row.get(0)?,
                        total_videos: row.get(1)?,
                        total_subscribers: row.get(2)?,
                        total_likes: row.get(3)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }
}

/// Subscription rows keyed on `match_column`, joined to the user in
/// `join_column`. A subscription whose joined user is gone is an error.
fn subscription_rows(
    conn: &Connection,
    join_column: &'static str,
    match_column: &'static str,
    id: Uuid,
    page: PageQuery,
) -> Result<Vec<(Uuid, chrono::DateTime<chrono::Utc>, OwnerProfile)>> {
    let sql = format!(
        "SELECT s.id, s.created_at, o.id, o.user_name, o.full_name, o.avatar
         FROM subscriptions s LEFT JOIN users o ON o.id = s.{join_column}
         WHERE s.{match_column} = ?1
         ORDER BY s.created_at DESC, s.rowid DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![id.to_string(), page.limit, page.offset() as i64], |row| {
            Ok((uuid_at(row, 0)?, ts_at(row, 1)?, owner_at(row, 2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(sid, at, profile)| {
            let profile = profile.ok_or_else(|| anyhow!("Subscription {} references a missing user", sid))?;
            Ok((sid, at, profile))
        })
        .collect()
}

pub(crate) fn playlist_videos(conn: &Connection, playlist_id: &str) -> Result<Vec<VideoWithOwner>> {
    let sql = format!(
        "SELECT {VIDEO_WITH_OWNER_COLUMNS}
         FROM playlist_videos p
         JOIN videos v ON v.id = p.video_id
         LEFT JOIN users o ON o.id = v.owner_id
         WHERE p.playlist_id = ?1
         ORDER BY p.position"
    );
    collect_videos(conn, &sql, [playlist_id])
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::read_models::{VideoListFilter, VideoSort};
    use crate::testing::{db, user, video};
    use vidtube_types::api::PageQuery;
    use vidtube_types::models::LikeTarget;

    #[test]
    fn channel_profile_counts_subscribers() {
        let db = db();
        let chan = user(&db, "chan");
        let viewer = user(&db, "viewer");
        for name in ["s1", "s2"] {
            let s = user(&db, name);
            db.toggle_subscription(s.id, chan.id).unwrap();
        }
        db.toggle_subscription(viewer.id, chan.id).unwrap();
        db.toggle_subscription(chan.id, viewer.id).unwrap();

        let profile = db.channel_profile("chan", Some(viewer.id)).unwrap().unwrap();
        assert_eq!(profile.subscribers_count, 3);
        assert_eq!(profile.channels_subscribed_to_count, 1);
        assert!(profile.is_subscribed);

        let anonymous = db.channel_profile("chan", None).unwrap().unwrap();
        assert!(!anonymous.is_subscribed);
    }

    #[test]
    fn channel_profile_for_unknown_handle_is_none() {
        let db = db();
        assert!(db.channel_profile("ghost", None).unwrap().is_none());
    }

    #[test]
    fn channel_without_subscribers_counts_zero() {
        let db = db();
        user(&db, "lonely");
        let profile = db.channel_profile("lonely", None).unwrap().unwrap();
        assert_eq!(profile.subscribers_count, 0);
        assert_eq!(profile.channels_subscribed_to_count, 0);
    }

    #[test]
    fn watch_history_preserves_watch_order_and_embeds_owner() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let a = video(&db, alice.id, "a");
        let b = video(&db, alice.id, "b");
        let c = video(&db, alice.id, "c");

        db.record_watch(bob.id, b.id).unwrap();
        db.record_watch(bob.id, a.id).unwrap();
        db.record_watch(bob.id, c.id).unwrap();
        // Re-watching moves the video to the end.
        db.record_watch(bob.id, b.id).unwrap();

        let history = db.watch_history(bob.id).unwrap();
        let ids: Vec<Uuid> = history.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![a.id, c.id, b.id]);
        assert_eq!(history[0].owner.user_name, "alice");
    }

    #[test]
    fn comments_page_embeds_single_owner_object() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let v = video(&db, alice.id, "clip");
        for i in 0..5 {
            db.create_comment(Uuid::new_v4(), v.id, bob.id, &format!("comment {i}")).unwrap();
        }

        let page = db.comments_page(v.id, PageQuery { page: 2, limit: 2 }).unwrap();
        assert_eq!(page.total_docs, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.docs.len(), 2);
        assert_eq!(page.docs[0].owner.user_name, "bob");
        assert_eq!(page.docs[0].content, "comment 2");
    }

    #[test]
    fn subscriber_lists_go_both_ways() {
        let db = db();
        let chan = user(&db, "chan");
        let fan = user(&db, "fan");
        db.toggle_subscription(fan.id, chan.id).unwrap();

        let subscribers = db.subscribers_page(chan.id, PageQuery::default()).unwrap();
        assert_eq!(subscribers.total_docs, 1);
        assert_eq!(subscribers.docs[0].subscriber.id, fan.id);

        let channels = db.subscribed_channels_page(fan.id, PageQuery::default()).unwrap();
        assert_eq!(channels.docs[0].channel.user_name, "chan");

        let empty = db.subscribers_page(fan.id, PageQuery::default()).unwrap();
        assert!(empty.docs.is_empty());
        assert_eq!(empty.total_docs, 0);
    }

    #[test]
    fn dashboard_stats_cover_views_videos_subscribers_likes() {
        let db = db();
        let chan = user(&db, "chan");
        let fan = user(&db, "fan");
        let a = video(&db, chan.id, "a");
        let b = video(&db, chan.id, "b");
        let other = video(&db, fan.id, "other");

        db.increment_views(a.id).unwrap();
        db.increment_views(a.id).unwrap();
        db.increment_views(b.id).unwrap();
        db.toggle_subscription(fan.id, chan.id).unwrap();
        db.toggle_like(fan.id, LikeTarget::Video(a.id)).unwrap();
        db.toggle_like(chan.id, LikeTarget::Video(b.id)).unwrap();
        db.toggle_like(chan.id, LikeTarget::Video(other.id)).unwrap();

        let stats = db.dashboard_stats(chan.id).unwrap();
        assert_eq!(stats.total_views, 3);
        assert_eq!(stats.total_videos, 2);
        assert_eq!(stats.total_subscribers, 1);
        assert_eq!(stats.total_likes, 2);

        let empty = db.dashboard_stats(Uuid::new_v4()).unwrap();
        assert_eq!(empty, Default::default());
    }

    #[test]
    fn video_listing_hides_other_users_unpublished_videos() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let public = video(&db, alice.id, "public cats");
        let hidden = video(&db, alice.id, "hidden cats");
        db.toggle_publish(hidden.id).unwrap();

        let as_bob = db
            .list_videos(&VideoListFilter {
                viewer: Some(bob.id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(as_bob.total_docs, 1);
        assert_eq!(as_bob.docs[0].id, public.id);

        let as_alice = db
            .list_videos(&VideoListFilter {
                viewer: Some(alice.id),
                text: Some("cats".into()),
                sort: VideoSort::Title,
                ascending: true,
                ..Default::default()
            })
            .unwrap();
        let titles: Vec<&str> = as_alice.docs.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["hidden cats", "public cats"]);
    }

    #[test]
    fn video_listing_treats_like_wildcards_literally() {
        let db = db();
        let alice = user(&db, "alice");
        video(&db, alice.id, "100% real");
        video(&db, alice.id, "100 real");

        let hits = db
            .list_videos(&VideoListFilter {
                text: Some("0%".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.total_docs, 1);
        assert_eq!(hits.docs[0].title, "100% real");
    }

    #[test]
    fn liked_videos_lists_only_video_likes() {
        let db = db();
        let alice = user(&db, "alice");
        let v = video(&db, alice.id, "clip");
        let c = db.create_comment(Uuid::new_v4(), v.id, alice.id, "hi").unwrap();
        db.toggle_like(alice.id, LikeTarget::Video(v.id)).unwrap();
        db.toggle_like(alice.id, LikeTarget::Comment(c.id)).unwrap();

        let liked = db.liked_videos(alice.id).unwrap();
        assert_eq!(liked.len(), 1);
        assert_eq!(liked[0].id, v.id);
    }
}
