//! Application layer: use cases driving the domain services.

mod extraction_engine;

pub use extraction_engine::{ExtractionEngine, RecordStream, SyncSummary};
