//! doctap Library
//!
//! Replication-state engine for extracting resumable record streams from a
//! document collection, by ordered snapshot scan or by change stream.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{ExtractionEngine, RecordStream, SyncSummary};
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::{EmissionRecord, ExtractionSettings, StreamDescriptor};
pub use domain::error::ReplicationError;
pub use domain::ports::{BookmarkBackend, ChangeLogSource, RecordSink, SnapshotSource};
pub use domain::services::BookmarkStore;
pub use domain::value_objects::{Bookmark, ReplicationMode, StreamKey};
pub use infrastructure::StopSignal;
