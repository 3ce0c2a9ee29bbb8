//! Pending-asset ledger.
//!
//! An upload to the media host and the row that references it cannot be
//! committed atomically. A marker is written before each upload, gets the URL
//! once the upload succeeds, and is removed by the same transaction that makes
//! the asset reachable. Markers that outlive the grace period point at
//! orphaned assets and are swept.

use anyhow::Result;
use rusqlite::{Connection, params};
use uuid::Uuid;

use vidtube_types::models::AssetKind;

use crate::Database;
use crate::models::{PendingAssetRow, now_ts, uuid_at};

impl Database {
    pub fn begin_pending_asset(&self, kind: AssetKind) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_assets (id, kind, url, created_at) VALUES (?1, ?2, NULL, ?3)",
                params![id.to_string(), kind.as_str(), now_ts()],
            )?;
            Ok(id)
        })
    }

    pub fn attach_pending_url(&self, marker: Uuid, url: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE pending_assets SET url = ?2 WHERE id = ?1",
                params![marker.to_string(), url],
            )?;
            Ok(())
        })
    }

    /// Drop markers whose assets were either committed elsewhere or already
    /// deleted from the media host.
    pub fn clear_pending_assets(&self, markers: &[Uuid]) -> Result<()> {
        self.with_conn(|conn| Ok(clear_markers(conn, markers)?))
    }

    /// Markers created before `cutoff` (an RFC 3339 timestamp).
    pub fn stale_pending_assets(&self, cutoff: &str) -> Result<Vec<PendingAssetRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, url FROM pending_assets
                 WHERE created_at < ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([cutoff], |row| {
                    let kind: String = row.get(1)?;
                    let kind = kind.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?;
                    Ok(PendingAssetRow {
                        id: uuid_at(row, 0)?,
                        kind,
                        url: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn clear_markers(conn: &Connection, markers: &[Uuid]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached("DELETE FROM pending_assets WHERE id = ?1")?;
    for marker in markers {
        stmt.execute([marker.to_string()])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SecondsFormat, Utc};
    use uuid::Uuid;

    use crate::models::NewVideo;
    use crate::testing::{db, user};
    use vidtube_types::models::AssetKind;

    fn future_cutoff() -> String {
        (Utc::now() + Duration::minutes(1)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    #[test]
    fn committed_markers_are_not_stale() {
        let db = db();
        let alice = user(&db, "alice");

        let video_marker = db.begin_pending_asset(AssetKind::Video).unwrap();
        db.attach_pending_url(video_marker, "https://media.test/v.mp4").unwrap();
        let thumb_marker = db.begin_pending_asset(AssetKind::Image).unwrap();
        db.attach_pending_url(thumb_marker, "https://media.test/t.png").unwrap();

        db.create_video(
            &NewVideo {
                id: Uuid::new_v4(),
                title: "t",
                description: "d",
                video_file: "https://media.test/v.mp4",
                thumbnail: "https://media.test/t.png",
                owner: alice.id,
                duration: 1.0,
            },
            &[video_marker, thumb_marker],
        )
        .unwrap();

        assert!(db.stale_pending_assets(&future_cutoff()).unwrap().is_empty());
    }

    #[test]
    fn failed_commit_leaves_marker_for_the_sweeper() {
        let db = db();
        let marker = db.begin_pending_asset(AssetKind::Video).unwrap();
        db.attach_pending_url(marker, "https://media.test/orphan.mp4").unwrap();

        // Owner does not exist, so the foreign key rejects the insert.
        let result = db.create_video(
            &NewVideo {
                id: Uuid::new_v4(),
                title: "t",
                description: "d",
                video_file: "https://media.test/orphan.mp4",
                thumbnail: "https://media.test/t.png",
                owner: Uuid::new_v4(),
                duration: 1.0,
            },
            &[marker],
        );
        assert!(result.is_err());

        let stale = db.stale_pending_assets(&future_cutoff()).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, marker);
        assert_eq!(stale[0].kind, AssetKind::Video);
        assert_eq!(stale[0].url.as_deref(), Some("https://media.test/orphan.mp4"));

        db.clear_pending_assets(&[marker]).unwrap();
        assert!(db.stale_pending_assets(&future_cutoff()).unwrap().is_empty());
    }

    #[test]
    fn fresh_markers_are_not_yet_stale() {
        let db = db();
        db.begin_pending_asset(AssetKind::Image).unwrap();
        let past = (Utc::now() - Duration::minutes(5)).to_rfc3339_opts(SecondsFormat::Millis, true);
        assert!(db.stale_pending_assets(&past).unwrap().is_empty());
    }
}
