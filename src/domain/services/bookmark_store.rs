//! Bookmark Store
//!
//! Holds the current replication position per stream partition and
//! enforces ordering for sorted streams. Every accepted position is written
//! through to the backend before `advance` returns.

use crate::domain::entities::StreamDescriptor;
use crate::domain::error::ReplicationError;
use crate::domain::ports::BookmarkBackend;
use crate::domain::value_objects::{Bookmark, ReplicationMode, StreamKey};
use dashmap::DashMap;
use std::sync::Arc;

/// Replication positions, cached over a durable backend.
///
/// Each key is loaded from the backend on first access. The cache only
/// changes after a successful backend write, so a failed write leaves the
/// store as it was.
pub struct BookmarkStore {
    backend: Arc<dyn BookmarkBackend>,
    positions: DashMap<StreamKey, Option<Bookmark>>,
}

impl BookmarkStore {
    pub fn new(backend: Arc<dyn BookmarkBackend>) -> Self {
        Self {
            backend,
            positions: DashMap::new(),
        }
    }

    /// Current position, or `None` to start from the configured default.
    pub fn get(&self, key: &StreamKey) -> Result<Option<Bookmark>, ReplicationError> {
        if let Some(cached) = self.positions.get(key) {
            return Ok(cached.value().clone());
        }

        let loaded = self.backend.load(key)?;
        tracing::debug!(stream = %key, bookmark = ?loaded, "loaded bookmark");
        self.positions.insert(key.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Accept a new position for `stream`.
    ///
    /// With `is_sorted`, a candidate that sorts lexically before the stored
    /// value fails with [`ReplicationError::OutOfOrder`]. Without it the
    /// candidate overwrites unconditionally.
    pub fn advance(
        &self,
        stream: &StreamDescriptor,
        candidate: Bookmark,
        is_sorted: bool,
    ) -> Result<(), ReplicationError> {
        ReplicationMode::from_declared(&stream.name, &stream.replication_method)?;

        if is_sorted && stream.replication_key().is_none() {
            return Err(ReplicationError::MissingReplicationKey {
                stream: stream.name.clone(),
                method: stream.replication_method.clone(),
            });
        }

        let key = stream.key();
        if is_sorted {
            if let Some(stored) = self.get(&key)? {
                if candidate.as_str() < stored.as_str() {
                    tracing::error!(
                        stream = %key,
                        stored = %stored,
                        candidate = %candidate,
                        "unsorted replication key detected"
                    );
                    return Err(ReplicationError::OutOfOrder {
                        key,
                        stored: stored.into_inner(),
                        candidate: candidate.into_inner(),
                    });
                }
            }
        }

        self.backend.persist(&key, &candidate)?;
        self.positions.insert(key, Some(candidate));
        Ok(())
    }
}
