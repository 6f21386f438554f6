//! Snapshot Source Port
//!
//! Defines the ordered range scan used by incremental replication.

use crate::domain::error::SourceError;
use bson::oid::ObjectId;
use bson::Document;

/// Lazily fetched scan results.
pub type DocumentCursor = Box<dyn Iterator<Item = Result<Document, SourceError>>>;

/// Source able to scan a collection in `_id` order.
pub trait SnapshotSource: Send + Sync {
    /// Every document with `_id` strictly greater than `after`, sorted
    /// ascending by `_id`.
    fn scan_after(&self, after: ObjectId) -> Result<DocumentCursor, SourceError>;
}
