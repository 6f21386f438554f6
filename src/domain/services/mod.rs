//! Domain Services
//!
//! Bookmark bookkeeping and the two readers it backs.

mod bookmark_store;
mod snapshot_reader;
mod tailing_reader;

pub use bookmark_store::BookmarkStore;
pub use snapshot_reader::{OrderedSnapshotReader, SnapshotRecords};
pub use tailing_reader::{ChangeRecords, TailState, TailingLogReader};
