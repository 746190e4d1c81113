//! SQLite cache for resolved track metadata.
//!
//! Resolved `(title, artist)` pairs are keyed by track id and kept across
//! runs in `metadata.db` inside the data directory. The cache never stores
//! misses, so a track that later becomes resolvable is picked up.

use crate::metadata::TrackInfo;
use anyhow::{anyhow, Context, Result};
use log::trace;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct MetadataCache {
    conn: Mutex<Connection>,
}

impl MetadataCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open metadata cache at {}", path.display()))?;
        Self::init(conn)
    }

    /// Cache that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory metadata cache")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS track_metadata (
                track_id   TEXT    PRIMARY KEY,
                title      TEXT    NOT NULL,
                artist     TEXT    NOT NULL,
                fetched_at INTEGER NOT NULL
            )",
            (),
        )
        .context("Invalid SQL command when creating track_metadata table")?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("metadata cache lock poisoned"))
    }

    pub fn get(&self, track_id: &str) -> Result<Option<TrackInfo>> {
        let conn = self.lock()?;
        let info = conn
            .query_row(
                "SELECT title, artist FROM track_metadata WHERE track_id = ?1",
                [track_id],
                |row| {
                    Ok(TrackInfo {
                        title: row.get(0)?,
                        artist: row.get(1)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to read cached metadata for {track_id}"))?;

        trace!("Metadata cache {} for {track_id}", if info.is_some() { "hit" } else { "miss" });
        Ok(info)
    }

    /// Insert or refresh one entry.
    pub fn put(&self, track_id: &str, info: &TrackInfo) -> Result<()> {
        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO track_metadata (track_id, title, artist, fetched_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![track_id, info.title, info.artist, fetched_at],
            )
            .with_context(|| format!("Failed to cache metadata for {track_id}"))?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM track_metadata", (), |row| row.get(0))
            .context("Failed to count cached metadata")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
