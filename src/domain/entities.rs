//! Domain Entities - Core business objects
//!
//! Stream declarations, raw change events as the source reports them, and
//! the normalized emission records handed to a sink.

use crate::domain::value_objects::{epoch, StreamKey};
use bson::oid::ObjectId;
use bson::{Document, Timestamp};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Operation kinds passed through by default in log-based mode.
pub const DEFAULT_OPERATION_TYPES: [&str; 4] = ["insert", "update", "replace", "delete"];

/// A stream as declared by the surrounding pipeline.
///
/// The replication method is kept as declared so an unknown method is
/// reported against the stream instead of being lost at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Fully qualified stream name
    pub name: String,
    /// Declared replication method (`INCREMENTAL` or `LOG_BASED`)
    pub replication_method: String,
    /// Replication key, `_id` for document collections
    pub replication_key: Option<String>,
    /// State partition key, if state partitioning is enabled
    pub partition: Option<String>,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>, replication_method: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replication_method: replication_method.into(),
            replication_key: Some("_id".to_string()),
            partition: None,
        }
    }

    pub fn with_replication_key(mut self, key: Option<String>) -> Self {
        self.replication_key = key;
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Configured replication key, treating an empty key as absent.
    pub fn replication_key(&self) -> Option<&str> {
        self.replication_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn key(&self) -> StreamKey {
        StreamKey::new(self.name.clone(), self.partition.clone())
    }
}

/// A database collection selected for replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    pub database: String,
    pub collection: String,
}

impl CollectionRef {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parse `database.collection`. Collection names may contain dots.
    pub fn parse(value: &str) -> Option<Self> {
        let (database, collection) = value.trim().split_once('.')?;
        if database.is_empty() || collection.is_empty() {
            return None;
        }
        Some(Self::new(database, collection))
    }

    /// Stream name `[prefix_]database_collection`.
    pub fn stream_name(&self, prefix: Option<&str>) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            parts.push(prefix);
        }
        parts.push(self.database.as_str());
        parts.push(self.collection.as_str());
        parts.join("_")
    }
}

/// Extraction options shared by both readers.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    /// Attach `_sdc_*` timestamps to emitted records
    pub add_record_metadata: bool,
    /// Start point for incremental streams without a bookmark
    pub start_date: DateTime<Utc>,
    /// Operation kinds allowed through in log-based mode
    pub operation_types: BTreeSet<String>,
    /// Server-side wait per change stream poll
    pub max_await_time: Option<Duration>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            add_record_metadata: false,
            start_date: epoch(),
            operation_types: DEFAULT_OPERATION_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_await_time: None,
        }
    }
}

/// A change event as reported by the source's change log.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeEvent {
    /// `_data` of the event's resume token
    pub resume_token: String,
    pub operation_type: String,
    pub cluster_time: Option<Timestamp>,
    pub ns: Option<Document>,
    pub full_document: Option<Document>,
}

/// Normalized record handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionRecord {
    /// Replication key value rendered as text
    #[serde(rename = "_id")]
    pub id: String,
    pub document: Option<Document>,
    #[serde(rename = "operationType", skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(rename = "clusterTime", skip_serializing_if = "Option::is_none")]
    pub cluster_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ns: Option<Document>,
    #[serde(rename = "_sdc_extracted_at", skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
    #[serde(rename = "_sdc_batched_at", skip_serializing_if = "Option::is_none")]
    pub batched_at: Option<String>,
    #[serde(rename = "_sdc_deleted_at", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl EmissionRecord {
    /// Record for a document read by the ordered scan.
    pub fn from_snapshot(id: ObjectId, document: Document, add_metadata: bool) -> Self {
        Self {
            id: id.to_hex(),
            document: Some(document),
            operation_type: None,
            cluster_time: None,
            ns: None,
            extracted_at: None,
            batched_at: add_metadata.then(now_iso),
            deleted_at: None,
        }
    }

    /// Record for a change event. `_id` is the event's resume token.
    pub fn from_change(event: RawChangeEvent, add_metadata: bool) -> Self {
        let cluster_time = event.cluster_time.and_then(timestamp_to_iso);
        let is_delete = event.operation_type == "delete";

        let (extracted_at, batched_at, deleted_at) = if add_metadata {
            (
                cluster_time.clone(),
                Some(now_iso()),
                cluster_time.clone().filter(|_| is_delete),
            )
        } else {
            (None, None, None)
        };

        Self {
            id: event.resume_token,
            document: event.full_document,
            operation_type: Some(event.operation_type),
            cluster_time,
            ns: event.ns,
            extracted_at,
            batched_at,
            deleted_at,
        }
    }

    pub fn is_change(&self) -> bool {
        self.operation_type.is_some()
    }
}

/// ISO-8601 rendering of a BSON timestamp's seconds component.
pub fn timestamp_to_iso(ts: Timestamp) -> Option<String> {
    Utc.timestamp_opt(i64::from(ts.time), 0)
        .single()
        .map(|dt| dt.to_rfc3339())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
