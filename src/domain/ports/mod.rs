mod bookmark_backend;
mod change_log_source;
mod record_sink;
mod snapshot_source;

pub use bookmark_backend::BookmarkBackend;
pub use change_log_source::{ChangeCursor, ChangeLogSource, WatchRequest};
pub use record_sink::RecordSink;
pub use snapshot_source::{DocumentCursor, SnapshotSource};
