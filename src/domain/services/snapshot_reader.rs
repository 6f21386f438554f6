//! Ordered Snapshot Reader
//!
//! Incremental replication: a single `_id`-ascending range scan starting
//! after the bookmark (or after the ObjectId derived from `start_date`).

use crate::domain::entities::{EmissionRecord, ExtractionSettings};
use crate::domain::error::{ReplicationError, SourceError};
use crate::domain::ports::{DocumentCursor, SnapshotSource};
use crate::domain::value_objects::{object_id_from_datetime, Bookmark};
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Reader for incremental streams.
pub struct OrderedSnapshotReader {
    source: Arc<dyn SnapshotSource>,
    start_date: DateTime<Utc>,
    add_record_metadata: bool,
}

impl OrderedSnapshotReader {
    pub fn new(source: Arc<dyn SnapshotSource>, settings: &ExtractionSettings) -> Self {
        Self {
            source,
            start_date: settings.start_date,
            add_record_metadata: settings.add_record_metadata,
        }
    }

    /// Resolve the exclusive lower bound of the scan.
    ///
    /// A bookmark that does not parse as an ObjectId is logged and replaced
    /// by the start date: the stream resyncs rather than skipping records.
    pub fn starting_id(&self, bookmark: Option<&Bookmark>) -> ObjectId {
        self.start_point(bookmark).0
    }

    /// Lower bound plus whether the bookmark was discarded.
    fn start_point(&self, bookmark: Option<&Bookmark>) -> (ObjectId, bool) {
        if let Some(bookmark) = bookmark {
            match parse_object_id(bookmark.as_str()) {
                Ok(oid) => return (oid, false),
                Err(e) => {
                    tracing::warn!("{}; falling back to start_date {}", e, self.start_date.to_rfc3339());
                    return (object_id_from_datetime(self.start_date), true);
                }
            }
        }
        tracing::info!("using start_date: {}", self.start_date.to_rfc3339());
        (object_id_from_datetime(self.start_date), false)
    }

    /// Open the scan. The returned sequence is finite and ascending.
    pub fn read(&self, bookmark: Option<&Bookmark>) -> Result<SnapshotRecords, ReplicationError> {
        let (after, bookmark_discarded) = self.start_point(bookmark);
        tracing::debug!(after = %after, "opening ordered scan");
        let cursor = self.source.scan_after(after)?;
        Ok(SnapshotRecords {
            cursor,
            add_record_metadata: self.add_record_metadata,
            bookmark_discarded,
        })
    }
}

fn parse_object_id(value: &str) -> Result<ObjectId, ReplicationError> {
    ObjectId::parse_str(value).map_err(|e| ReplicationError::IdentifierParse {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Lazily normalized scan results.
pub struct SnapshotRecords {
    cursor: DocumentCursor,
    add_record_metadata: bool,
    bookmark_discarded: bool,
}

impl SnapshotRecords {
    /// The stored bookmark was unparseable and the scan restarted from
    /// the start date. The stored value is no lower bound for new positions.
    pub fn bookmark_discarded(&self) -> bool {
        self.bookmark_discarded
    }
}

impl Iterator for SnapshotRecords {
    type Item = Result<EmissionRecord, ReplicationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let document = match self.cursor.next()? {
            Ok(document) => document,
            Err(e) => return Some(Err(e.into())),
        };

        let record = match document.get_object_id("_id") {
            Ok(oid) => Ok(EmissionRecord::from_snapshot(
                oid,
                document,
                self.add_record_metadata,
            )),
            Err(e) => Err(SourceError::MalformedDocument(format!("_id: {}", e)).into()),
        };
        Some(record)
    }
}
