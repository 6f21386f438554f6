//! Bookmark Backend Port
//!
//! Defines the interface for durably storing replication positions.
//! Implementations may use SQLite or in-memory storage.

use crate::domain::error::PersistenceError;
use crate::domain::value_objects::{Bookmark, StreamKey};

/// Durable mapping from stream partition to last-known position.
///
/// This is an outbound port. The bookmark store reads each key once and
/// writes after every processed record, so `persist` must not return
/// until the write is durable.
pub trait BookmarkBackend: Send + Sync {
    /// Load the stored position, or `None` if the stream never ran.
    fn load(&self, key: &StreamKey) -> Result<Option<Bookmark>, PersistenceError>;

    /// Store a position, replacing any previous value.
    fn persist(&self, key: &StreamKey, bookmark: &Bookmark) -> Result<(), PersistenceError>;
}
