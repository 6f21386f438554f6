mod dashmap_bookmark_backend;
mod jsonl_record_sink;
mod memory_collection;
#[cfg(feature = "mongodb")]
mod mongo_collection;
mod sqlite_bookmark_backend;

pub use dashmap_bookmark_backend::DashMapBookmarkBackend;
pub use jsonl_record_sink::{JsonLinesSink, VecSink};
pub use memory_collection::MemoryCollection;
#[cfg(feature = "mongodb")]
pub use mongo_collection::MongoCollection;
pub use sqlite_bookmark_backend::SqliteBookmarkBackend;
