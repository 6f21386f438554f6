//! SQLite Bookmark Backend
//!
//! Implements BookmarkBackend using SQLite for storage. Each persist is a
//! single autocommitted upsert with `synchronous = FULL`, so it is durable
//! once it returns.

use crate::domain::error::PersistenceError;
use crate::domain::ports::BookmarkBackend;
use crate::domain::value_objects::{Bookmark, StreamKey};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite-backed bookmark backend.
///
/// Unpartitioned streams are stored with an empty partition column.
pub struct SqliteBookmarkBackend {
    conn: Mutex<Connection>,
}

impl SqliteBookmarkBackend {
    /// Open (or create) the state database at `path`.
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)
            .map_err(|e| PersistenceError::Unavailable(format!("{}: {}", path, e)))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "PRAGMA synchronous = FULL;
             CREATE TABLE IF NOT EXISTS bookmarks (
                 stream TEXT NOT NULL,
                 partition TEXT NOT NULL DEFAULT '',
                 value TEXT NOT NULL,
                 updated_at INTEGER NOT NULL,
                 PRIMARY KEY (stream, partition)
             );",
        )
        .map_err(|e| PersistenceError::Unavailable(format!("schema setup failed: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored positions.
    pub fn count(&self) -> Result<usize, PersistenceError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bookmarks", [], |row| row.get(0))
            .map_err(|e| PersistenceError::Read(e.to_string()))?;
        Ok(count as usize)
    }
}

fn partition_column(key: &StreamKey) -> &str {
    key.partition.as_deref().unwrap_or("")
}

impl BookmarkBackend for SqliteBookmarkBackend {
    fn load(&self, key: &StreamKey) -> Result<Option<Bookmark>, PersistenceError> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM bookmarks WHERE stream = ?1 AND partition = ?2",
                params![key.stream, partition_column(key)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| PersistenceError::Read(e.to_string()))?;
        Ok(value.map(Bookmark::from))
    }

    fn persist(&self, key: &StreamKey, bookmark: &Bookmark) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bookmarks (stream, partition, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(stream, partition)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![
                key.stream,
                partition_column(key),
                bookmark.as_str(),
                chrono::Utc::now().timestamp_millis()
            ],
        )
        .map_err(|e| PersistenceError::Write(e.to_string()))?;
        Ok(())
    }
}
