//! Replay persistence.
//!
//! RULE: Only store.rs talks to the database.
//! A replay is one JSON document plus a few indexed columns; the
//! artifact locator is kept in its own column because it is assigned
//! after the document is written.

use crate::{
    error::{SimError, SimResult},
    replay::ReplayData,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// Storage collaborator for finished replays.
pub trait ReplayStore: Send + Sync {
    /// Insert or replace the artifact under its replay id.
    fn put(&self, replay: &ReplayData) -> SimResult<()>;

    fn get(&self, replay_id: &str) -> SimResult<Option<ReplayData>>;

    /// Record where the artifact can be fetched. Returns false if the
    /// replay does not exist.
    fn set_locator(&self, replay_id: &str, locator: &str) -> SimResult<bool>;

    /// `Some(None)` means the replay exists but has no locator yet.
    fn locator(&self, replay_id: &str) -> SimResult<Option<Option<String>>>;
}

fn poisoned() -> SimError {
    SimError::Other(anyhow::anyhow!("replay store lock poisoned"))
}

pub struct SqliteReplayStore {
    conn: Mutex<Connection>,
}

impl SqliteReplayStore {
    /// Open (or create) the replay database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.lock()?
            .execute_batch(include_str!("../../migrations/001_replays.sql"))?;
        Ok(())
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| poisoned())
    }
}

impl ReplayStore for SqliteReplayStore {
    fn put(&self, replay: &ReplayData) -> SimResult<()> {
        let m = &replay.metadata;
        let document = serde_json::to_string(replay)?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO replay
                (replay_id, seed, commander_id, final_outcome, partial, content_hash,
                 locator, created_at, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                m.replay_id,
                m.seed as i64,
                m.commander_id,
                m.final_outcome.as_str(),
                m.partial,
                replay.generation.content_hash,
                m.artifact_locator,
                m.start_time.to_rfc3339(),
                document,
            ],
        )?;
        log::info!("stored replay {} ({} bytes)", m.replay_id, document.len());
        Ok(())
    }

    fn get(&self, replay_id: &str) -> SimResult<Option<ReplayData>> {
        let row: Option<(String, Option<String>)> = self
            .lock()?
            .query_row(
                "SELECT document, locator FROM replay WHERE replay_id = ?1",
                params![replay_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((document, locator)) = row else {
            return Ok(None);
        };
        let mut replay: ReplayData = serde_json::from_str(&document)?;
        replay.metadata.artifact_locator = locator;
        Ok(Some(replay))
    }

    fn set_locator(&self, replay_id: &str, locator: &str) -> SimResult<bool> {
        let updated = self.lock()?.execute(
            "UPDATE replay SET locator = ?2 WHERE replay_id = ?1",
            params![replay_id, locator],
        )?;
        Ok(updated > 0)
    }

    fn locator(&self, replay_id: &str) -> SimResult<Option<Option<String>>> {
        let locator = self
            .lock()?
            .query_row(
                "SELECT locator FROM replay WHERE replay_id = ?1",
                params![replay_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(locator)
    }
}

/// Process-local store for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryReplayStore {
    replays: Mutex<HashMap<String, ReplayData>>,
}

impl MemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, HashMap<String, ReplayData>>> {
        self.replays.lock().map_err(|_| poisoned())
    }
}

impl ReplayStore for MemoryReplayStore {
    fn put(&self, replay: &ReplayData) -> SimResult<()> {
        self.lock()?.insert(replay.metadata.replay_id.clone(), replay.clone());
        Ok(())
    }

    fn get(&self, replay_id: &str) -> SimResult<Option<ReplayData>> {
        Ok(self.lock()?.get(replay_id).cloned())
    }

    fn set_locator(&self, replay_id: &str, locator: &str) -> SimResult<bool> {
        Ok(match self.lock()?.get_mut(replay_id) {
            Some(replay) => {
                replay.metadata.artifact_locator = Some(locator.to_string());
                true
            }
            None => false,
        })
    }

    fn locator(&self, replay_id: &str) -> SimResult<Option<Option<String>>> {
        Ok(self.lock()?.get(replay_id).map(|r| r.metadata.artifact_locator.clone()))
    }
}
