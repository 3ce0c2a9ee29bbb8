use anyhow::Result;
use rusqlite::{TransactionBehavior, params};
use uuid::Uuid;

use vidtube_types::models::LikeTarget;

use crate::Database;
use crate::models::now_ts;

impl Database {
    /// Insert the like if absent, otherwise delete it, in one write
    /// transaction guarded by the (actor, target) unique key.
    /// Returns true when the like now exists.
    pub fn toggle_like(&self, actor: Uuid, target: LikeTarget) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT INTO likes (id, liked_by, target_kind, target_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (liked_by, target_kind, target_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    actor.to_string(),
                    target.kind(),
                    target.id().to_string(),
                    now_ts(),
                ],
            )?;
            if inserted == 0 {
                tx.execute(
                    "DELETE FROM likes WHERE liked_by = ?1 AND target_kind = ?2 AND target_id = ?3",
                    params![actor.to_string(), target.kind(), target.id().to_string()],
                )?;
            }
            tx.commit()?;
            Ok(inserted > 0)
        })
    }

    /// Whether the liked target row exists.
    pub fn like_target_exists(&self, target: LikeTarget) -> Result<bool> {
        let table = match target {
            LikeTarget::Video(_) => "videos",
            LikeTarget::Comment(_) => "comments",
            LikeTarget::Tweet(_) => "tweets",
        };
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"),
                [target.id().to_string()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Subscribe if not subscribed, otherwise unsubscribe. Same atomicity as
    /// `toggle_like`. Returns true when the subscription now exists.
    pub fn toggle_subscription(&self, subscriber: Uuid, channel: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT INTO subscriptions (id, subscriber_id, channel_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (subscriber_id, channel_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    subscriber.to_string(),
                    channel.to_string(),
                    now_ts(),
                ],
            )?;
            if inserted == 0 {
                tx.execute(
                    "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND channel_id = ?2",
                    [subscriber.to_string(), channel.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(inserted > 0)
        })
    }
}
