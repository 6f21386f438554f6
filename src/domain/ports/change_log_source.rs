//! Change Log Source Port
//!
//! Defines the tailing cursor used by log-based replication.

use crate::domain::entities::RawChangeEvent;
use crate::domain::error::SourceError;
use std::time::Duration;

/// Options for opening a change stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchRequest {
    /// Resume token `_data` to resume after; `None` opens at the current tail
    pub resume_after: Option<String>,
    /// Ask the source to look up the full current document for updates
    pub full_document_lookup: bool,
    /// Server-side wait per poll
    pub max_await_time: Option<Duration>,
}

/// Open change stream cursor.
pub trait ChangeCursor {
    /// Next available event, or `None` if nothing is available right now.
    /// Must not wait for new events beyond the configured await time.
    fn try_next(&mut self) -> Result<Option<RawChangeEvent>, SourceError>;

    /// Whether the cursor can still produce events.
    fn is_alive(&self) -> bool;

    /// Release server-side resources. Called exactly once.
    fn close(&mut self);
}

/// Source exposing a tailable change log.
pub trait ChangeLogSource: Send + Sync {
    /// Open a cursor. A rejected resume token must be reported as
    /// [`SourceError::ResumeTokenRejected`].
    fn open(&self, request: &WatchRequest) -> Result<Box<dyn ChangeCursor>, SourceError>;
}
