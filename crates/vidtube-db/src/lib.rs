pub mod assets;
pub mod migrations;
pub mod models;
pub mod playlists;
pub mod queries;
pub mod read_models;
pub mod toggles;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Like `with_conn`, but hands out a mutable connection so the closure can
    /// open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

/// True when `err` wraps a UNIQUE constraint failure from SQLite.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use uuid::Uuid;

    use crate::Database;
    use crate::models::{NewUser, NewVideo, UserRow};
    use vidtube_types::models::Video;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn user(db: &Database, name: &str) -> UserRow {
        db.create_user(
            &NewUser {
                id: Uuid::new_v4(),
                user_name: name,
                email: &format!("{name}@example.com"),
                full_name: &format!("{name} tester"),
                avatar: &format!("https://media.test/{name}-avatar.png"),
                cover_image: None,
                password_hash: "hash",
            },
            &[],
        )
        .unwrap()
    }

    pub fn video(db: &Database, owner: Uuid, title: &str) -> Video {
        let id = Uuid::new_v4();
        db.create_video(
            &NewVideo {
                id,
                title,
                description: "a description",
                video_file: &format!("https://media.test/{id}.mp4"),
                thumbnail: &format!("https://media.test/{id}.png"),
                owner,
                duration: 12.5,
            },
            &[],
        )
        .unwrap()
    }
}
