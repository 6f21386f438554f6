//! DashMap Bookmark Backend
//!
//! Implements BookmarkBackend in memory using DashMap. Positions last as
//! long as the process; useful for embedding and tests.

use crate::domain::error::PersistenceError;
use crate::domain::ports::BookmarkBackend;
use crate::domain::value_objects::{Bookmark, StreamKey};
use dashmap::DashMap;
use std::collections::BTreeMap;

/// In-memory bookmark backend.
pub struct DashMapBookmarkBackend {
    bookmarks: DashMap<StreamKey, Bookmark>,
}

impl DashMapBookmarkBackend {
    pub fn new() -> Self {
        Self {
            bookmarks: DashMap::new(),
        }
    }

    /// Seed a position, as an operator restoring state would.
    pub fn with_bookmark(self, key: StreamKey, bookmark: impl Into<Bookmark>) -> Self {
        self.bookmarks.insert(key, bookmark.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    /// Copy of all positions, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<StreamKey, Bookmark> {
        self.bookmarks
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for DashMapBookmarkBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BookmarkBackend for DashMapBookmarkBackend {
    fn load(&self, key: &StreamKey) -> Result<Option<Bookmark>, PersistenceError> {
        Ok(self.bookmarks.get(key).map(|e| e.value().clone()))
    }

    fn persist(&self, key: &StreamKey, bookmark: &Bookmark) -> Result<(), PersistenceError> {
        self.bookmarks.insert(key.clone(), bookmark.clone());
        Ok(())
    }
}
