//! # Playlist Store
//!
//! SQLite-backed document store for [`Playlist`] records. Each playlist is
//! kept as one JSON document next to a few indexed columns and a `version`
//! counter; writes go through [`PlaylistStore::update`], which only applies
//! when the version read earlier is still current.
//!
//! Releases and refreshes additionally take a generation lease, a row in
//! `generation_leases` shared by every process using the same database
//! file. A lease left behind by a crashed process expires after
//! [`LEASE_TIMEOUT_SECS`].

use crate::error::{BlendError, Result};
use crate::model::{Playlist, PlaylistStatus, RefreshCadence};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Age after which a generation lease may be taken over.
pub const LEASE_TIMEOUT_SECS: i64 = 30 * 60;

/// How long a write waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A playlist together with the version it was read at.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub playlist: Playlist,
    pub version: i64,
}

pub struct PlaylistStore {
    conn: Mutex<Connection>,
}

impl PlaylistStore {
    /// Open (and migrate) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        info!("Opened playlist store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    /// Drop every stored playlist and recreate the schema.
    pub fn reset(&self) -> Result<()> {
        self.connection()?
            .execute_batch("DROP TABLE IF EXISTS playlists; DROP TABLE IF EXISTS generation_leases;")?;
        self.init()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        // A poisoned lock still guards a usable connection.
        Ok(self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS playlists (
                id            TEXT PRIMARY KEY,
                status        TEXT NOT NULL,
                refresh_every TEXT,
                document      TEXT NOT NULL,
                version       INTEGER NOT NULL DEFAULT 1,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_playlists_status ON playlists(status);
            CREATE INDEX IF NOT EXISTS idx_playlists_refresh ON playlists(refresh_every);

            CREATE TABLE IF NOT EXISTS generation_leases (
                playlist_id TEXT PRIMARY KEY,
                owner       TEXT NOT NULL,
                acquired_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn insert(&self, playlist: &Playlist) -> Result<()> {
        let document = serde_json::to_string(playlist)?;
        let now = chrono::Utc::now().to_rfc3339();
        self.connection()?.execute(
            "INSERT INTO playlists (id, status, refresh_every, document, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            params![
                playlist.id,
                playlist.status.to_string(),
                refresh_column(playlist),
                document,
                now
            ],
        )?;
        debug!("Inserted playlist {}", playlist.id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Versioned>> {
        let row: Option<(String, i64)> = self
            .connection()?
            .query_row(
                "SELECT document, version FROM playlists WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(document, version)| {
            Ok(Versioned {
                playlist: serde_json::from_str(&document)?,
                version,
            })
        })
        .transpose()
    }

    /// Like [`get`](Self::get) but a missing playlist is an error.
    pub fn require(&self, id: &str) -> Result<Versioned> {
        self.get(id)?.ok_or_else(|| BlendError::NotFound(id.to_string()))
    }

    /// Replace the stored document if it is still at `expected_version`.
    ///
    /// Returns the new version, or [`BlendError::Conflict`] when someone else
    /// wrote first.
    pub fn update(&self, playlist: &Playlist, expected_version: i64) -> Result<i64> {
        let document = serde_json::to_string(playlist)?;
        let changed = self.connection()?.execute(
            "UPDATE playlists
             SET status = ?1, refresh_every = ?2, document = ?3, version = version + 1, updated_at = ?4
             WHERE id = ?5 AND version = ?6",
            params![
                playlist.status.to_string(),
                refresh_column(playlist),
                document,
                chrono::Utc::now().to_rfc3339(),
                playlist.id,
                expected_version
            ],
        )?;

        match changed {
            1 => Ok(expected_version + 1),
            _ if self.get(&playlist.id)?.is_none() => Err(BlendError::NotFound(playlist.id.clone())),
            _ => Err(BlendError::Conflict(playlist.id.clone())),
        }
    }

    /// Claim the generation lease of a playlist for `owner`.
    ///
    /// Fails with [`BlendError::Busy`] while another owner holds a lease
    /// younger than [`LEASE_TIMEOUT_SECS`].
    pub fn acquire_lease(&self, playlist_id: &str, owner: &str) -> Result<()> {
        self.claim_lease(playlist_id, owner, chrono::Utc::now().timestamp())
    }

    fn claim_lease(&self, playlist_id: &str, owner: &str, now: i64) -> Result<()> {
        let claimed = self.connection()?.execute(
            "INSERT INTO generation_leases (playlist_id, owner, acquired_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(playlist_id) DO UPDATE
             SET owner = excluded.owner, acquired_at = excluded.acquired_at
             WHERE generation_leases.acquired_at <= ?4",
            params![playlist_id, owner, now, now - LEASE_TIMEOUT_SECS],
        )?;

        if claimed == 0 {
            return Err(BlendError::Busy(playlist_id.to_string()));
        }
        debug!("Lease on playlist {playlist_id} taken by {owner}");
        Ok(())
    }

    /// Give up a lease; a lease that was taken over meanwhile is left alone.
    pub fn release_lease(&self, playlist_id: &str, owner: &str) -> Result<()> {
        self.connection()?.execute(
            "DELETE FROM generation_leases WHERE playlist_id = ?1 AND owner = ?2",
            params![playlist_id, owner],
        )?;
        Ok(())
    }

    /// Playlists the user takes part in or was invited to by email.
    pub fn list_for_user(&self, user_id: &str, email: Option<&str>) -> Result<Vec<Playlist>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT document FROM playlists
             WHERE EXISTS (
                 SELECT 1 FROM json_each(playlists.document, '$.participations') AS p
                 WHERE json_extract(p.value, '$.user.id') = ?1
             )
             OR (?2 IS NOT NULL AND EXISTS (
                 SELECT 1 FROM json_each(playlists.document, '$.invitations') AS i
                 WHERE i.value = ?2
             ))
             ORDER BY created_at",
        )?;

        let documents = stmt.query_map(params![user_id, email], |row| row.get::<_, String>(0))?;
        let mut playlists = Vec::new();
        for document in documents {
            playlists.push(serde_json::from_str(&document?)?);
        }
        Ok(playlists)
    }

    /// Released playlists that have a refresh cadence configured.
    pub fn list_scheduled(&self) -> Result<Vec<Playlist>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT document FROM playlists
             WHERE refresh_every IS NOT NULL AND status = ?1
             ORDER BY created_at",
        )?;

        let documents = stmt.query_map([PlaylistStatus::Released.to_string()], |row| row.get::<_, String>(0))?;
        let mut playlists = Vec::new();
        for document in documents {
            playlists.push(serde_json::from_str(&document?)?);
        }
        Ok(playlists)
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT id FROM playlists ORDER BY created_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

fn refresh_column(playlist: &Playlist) -> Option<&'static str> {
    playlist.refresh_every.map(RefreshCadence::as_str)
}
