//! Domain Layer
//!
//! Replication primitives, ports to the outside world, and the bookmark
//! and reader services built on them.

pub mod entities;
pub mod error;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{CollectionRef, EmissionRecord, ExtractionSettings, RawChangeEvent, StreamDescriptor};
pub use error::{PersistenceError, ReplicationError, SinkError, SourceError};
pub use value_objects::{Bookmark, ReplicationMode, StreamKey};
