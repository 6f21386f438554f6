//! In-Memory Collection
//!
//! Implements SnapshotSource and ChangeLogSource over an in-process
//! document collection. Mutations append to a change log that open cursors
//! observe, so the collection behaves like a single-node change stream.

use crate::domain::entities::RawChangeEvent;
use crate::domain::error::SourceError;
use crate::domain::ports::{ChangeCursor, ChangeLogSource, DocumentCursor, SnapshotSource, WatchRequest};
use bson::oid::ObjectId;
use bson::{doc, Document, Timestamp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared between the collection and its cursors.
struct ChangeLog {
    events: RwLock<Vec<RawChangeEvent>>,
    open_cursors: AtomicUsize,
}

/// In-process collection keyed by ObjectId.
pub struct MemoryCollection {
    database: String,
    collection: String,
    documents: RwLock<BTreeMap<ObjectId, Document>>,
    log: Arc<ChangeLog>,
}

impl MemoryCollection {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            documents: RwLock::new(BTreeMap::new()),
            log: Arc::new(ChangeLog {
                events: RwLock::new(Vec::new()),
                open_cursors: AtomicUsize::new(0),
            }),
        }
    }

    /// Insert a document, assigning an `_id` when it has no ObjectId one.
    /// Returns the resume token of the resulting change event.
    pub fn insert(&self, mut document: Document) -> String {
        let id = match document.get_object_id("_id") {
            Ok(id) => id,
            Err(_) => {
                let id = ObjectId::new();
                document.insert("_id", id);
                id
            }
        };
        self.documents.write().insert(id, document.clone());
        self.record("insert", Some(document))
    }

    /// Replace the document stored under `id`. Returns `None` if absent.
    pub fn update(&self, id: ObjectId, mut document: Document) -> Option<String> {
        document.insert("_id", id);
        let mut documents = self.documents.write();
        let slot = documents.get_mut(&id)?;
        *slot = document.clone();
        drop(documents);
        Some(self.record("update", Some(document)))
    }

    /// Delete the document stored under `id`. Returns `None` if absent.
    pub fn delete(&self, id: ObjectId) -> Option<String> {
        self.documents.write().remove(&id)?;
        Some(self.record("delete", None))
    }

    /// Drop the collection; open cursors see `drop` then `invalidate` and die.
    pub fn drop_collection(&self) {
        self.documents.write().clear();
        self.record("drop", None);
        self.record("invalidate", None);
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Number of change cursors currently open.
    pub fn open_cursors(&self) -> usize {
        self.log.open_cursors.load(Ordering::SeqCst)
    }

    fn record(&self, operation_type: &str, full_document: Option<Document>) -> String {
        let mut events = self.log.events.write();
        let seq = events.len() as u32 + 1;
        let token = resume_token(seq);
        events.push(RawChangeEvent {
            resume_token: token.clone(),
            operation_type: operation_type.to_string(),
            cluster_time: Some(Timestamp {
                time: chrono::Utc::now().timestamp().max(0) as u32,
                increment: seq,
            }),
            ns: Some(doc! { "db": self.database.as_str(), "coll": self.collection.as_str() }),
            full_document,
        });
        token
    }
}

fn resume_token(seq: u32) -> String {
    format!("82{:08X}", seq)
}

fn token_position(events: &[RawChangeEvent], token: &str) -> Option<usize> {
    events
        .iter()
        .position(|e| e.resume_token == token)
        .map(|i| i + 1)
}

impl SnapshotSource for MemoryCollection {
    fn scan_after(&self, after: ObjectId) -> Result<DocumentCursor, SourceError> {
        let matches: Vec<Result<Document, SourceError>> = self
            .documents
            .read()
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .map(|(_, d)| Ok(d.clone()))
            .collect();
        Ok(Box::new(matches.into_iter()))
    }
}

impl ChangeLogSource for MemoryCollection {
    fn open(&self, request: &WatchRequest) -> Result<Box<dyn ChangeCursor>, SourceError> {
        let events = self.log.events.read();
        let position = match request.resume_after.as_deref() {
            Some(token) => token_position(&events, token).ok_or_else(|| {
                SourceError::ResumeTokenRejected {
                    token: token.to_string(),
                    reason: "token not found in change log".to_string(),
                }
            })?,
            None => events.len(),
        };
        drop(events);

        self.log.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChangeCursor {
            log: self.log.clone(),
            position,
            alive: true,
            open: true,
        }))
    }
}

struct MemoryChangeCursor {
    log: Arc<ChangeLog>,
    position: usize,
    alive: bool,
    open: bool,
}

impl ChangeCursor for MemoryChangeCursor {
    fn try_next(&mut self) -> Result<Option<RawChangeEvent>, SourceError> {
        if !self.alive {
            return Ok(None);
        }
        let events = self.log.events.read();
        let Some(event) = events.get(self.position).cloned() else {
            return Ok(None);
        };
        self.position += 1;
        if event.operation_type == "invalidate" {
            self.alive = false;
        }
        Ok(Some(event))
    }

    fn is_alive(&self) -> bool {
        self.alive && self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryChangeCursor {
    fn drop(&mut self) {
        self.close();
    }
}
