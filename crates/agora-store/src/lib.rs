//! # agora-store
//!
//! SQLite-backed implementation of [`agora_dht::collab::KvStore`].
//!
//! Manages a single table keyed by the DHT's 160-bit hex keys, mirroring
//! `ochra-db`'s WAL-mode, `PRAGMA user_version`-tracked single-database
//! pattern, narrowed to the one table the DHT core needs.

use std::path::Path;

use agora_dht::collab::KvStore;
use agora_dht::guid::Guid;
use rusqlite::{params, Connection, OptionalExtension};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS dht_kv (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
";

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A SQLite-backed key-value store for the DHT's persisted state
/// (`NODE_STATE_KEY` and any host-application entries sharing the table).
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version == 0 {
        tracing::info!("initializing agora-store schema v{SCHEMA_VERSION}");
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

impl KvStore for SqliteKvStore {
    fn put(&mut self, key: &Guid, value: &[u8]) -> std::result::Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO dht_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key.to_hex(), value],
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn get(&self, key: &Guid) -> std::result::Result<Option<Vec<u8>>, String> {
        self.conn
            .query_row(
                "SELECT value FROM dht_kv WHERE key = ?1",
                params![key.to_hex()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())
    }

    fn del(&mut self, key: &Guid) -> std::result::Result<(), String> {
        self.conn
            .execute("DELETE FROM dht_kv WHERE key = ?1", params![key.to_hex()])
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn keys(&self) -> std::result::Result<Vec<Guid>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM dht_kv")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        for row in rows {
            let hex = row.map_err(|e| e.to_string())?;
            let guid = Guid::from_hex(&hex).ok_or_else(|| format!("corrupt key in dht_kv: {hex}"))?;
            out.push(guid);
        }
        Ok(out)
    }
}
