//! dohr-store — SQLite persistence for the entrance pipeline.
//!
//! Three concerns share one database: the identity roster, the entrance
//! registry (with its at-most-one-entrance-per-identity-per-window
//! invariant), and the persisted pause flag. All access goes through
//! [`Store`], an async handle over a single `tokio-rusqlite` connection.

mod entrance;
mod roster;
mod state;

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

pub use entrance::Registration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    photo       BLOB NOT NULL,
    track_uri   TEXT NOT NULL,
    track_name  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entrances (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entrances_name_ts ON entrances (name, timestamp);

CREATE TABLE IF NOT EXISTS system_state (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    is_paused   INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO system_state (id, is_paused) VALUES (1, 0);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("identity already enrolled: {0}")]
    DuplicateName(String),
    #[error("invalid timestamp in store: {0}")]
    BadTimestamp(String),
}

/// Async handle to the Dohr database.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (and initialize) the database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init().await?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Open an in-memory database. Used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Fixed-width UTC timestamp encoding ("2026-08-26T10:00:00.000Z").
///
/// Fixed width keeps lexicographic comparison in SQL equal to
/// chronological comparison.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::BadTimestamp(raw.to_string()))
}
