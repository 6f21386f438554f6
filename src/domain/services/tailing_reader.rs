//! Tailing Log Reader
//!
//! Log-based replication over a change stream. One invocation opens the
//! cursor, drains it, and closes once it has caught up:
//!
//! - Until the first allow-listed event, an empty poll keeps the cursor open.
//!   Some backends only hand out a resumable token after an event has been
//!   published, so closing here could never record progress.
//! - After at least one record, an empty poll means the backlog is drained
//!   and the invocation closes.
//!
//! Excluded operation kinds are discarded and do not count as progress.

use crate::domain::entities::{EmissionRecord, ExtractionSettings, RawChangeEvent};
use crate::domain::error::{ReplicationError, SourceError};
use crate::domain::ports::{ChangeCursor, ChangeLogSource, WatchRequest};
use crate::domain::value_objects::Bookmark;
use crate::infrastructure::shutdown::StopSignal;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Pause after an empty poll before the first record. Sources whose
/// `try_next` returns immediately would otherwise spin.
const IDLE_POLL_PAUSE: Duration = Duration::from_millis(1);

/// Reader for log-based streams.
pub struct TailingLogReader {
    source: Arc<dyn ChangeLogSource>,
    operation_types: BTreeSet<String>,
    add_record_metadata: bool,
    max_await_time: Option<Duration>,
}

impl TailingLogReader {
    pub fn new(source: Arc<dyn ChangeLogSource>, settings: &ExtractionSettings) -> Self {
        Self {
            source,
            operation_types: settings.operation_types.clone(),
            add_record_metadata: settings.add_record_metadata,
            max_await_time: settings.max_await_time,
        }
    }

    /// Open the change stream, resuming after `bookmark` when present.
    ///
    /// A resume token the source refuses is fatal: restarting from the tail
    /// would silently skip every change since the token.
    pub fn open(
        &self,
        stream: &str,
        bookmark: Option<&Bookmark>,
        stop: StopSignal,
    ) -> Result<ChangeRecords, ReplicationError> {
        let request = WatchRequest {
            resume_after: bookmark.map(|b| b.as_str().to_string()),
            full_document_lookup: true,
            max_await_time: self.max_await_time,
        };

        let cursor = self
            .source
            .open(&request)
            .map_err(|e| source_failure(stream, e))?;

        match &request.resume_after {
            Some(token) => tracing::info!(stream, token = %token, "resuming change stream"),
            None => tracing::info!(stream, "opening change stream at current tail"),
        }

        Ok(ChangeRecords {
            stream: stream.to_string(),
            cursor: CursorGuard::new(cursor),
            allow_list: self.operation_types.clone(),
            add_record_metadata: self.add_record_metadata,
            state: TailState::Draining,
            has_seen_a_record: false,
            discarded: 0,
            stop,
        })
    }
}

fn source_failure(stream: &str, error: SourceError) -> ReplicationError {
    match error {
        SourceError::ResumeTokenRejected { token, reason } => {
            tracing::error!(stream, token = %token, "resume token rejected: {}", reason);
            ReplicationError::ResumeTokenRejected {
                stream: stream.to_string(),
                token,
                reason,
            }
        }
        other => other.into(),
    }
}

/// Lifecycle of one tailing invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// Polling for events
    Draining,
    /// Caught up, cancelled, failed or cursor died; the cursor is released
    Closed,
}

/// Change records for one invocation.
///
/// The cursor is released when the sequence ends, fails, or is dropped.
pub struct ChangeRecords {
    stream: String,
    cursor: CursorGuard,
    allow_list: BTreeSet<String>,
    add_record_metadata: bool,
    state: TailState,
    has_seen_a_record: bool,
    discarded: u64,
    stop: StopSignal,
}

impl ChangeRecords {
    pub fn state(&self) -> TailState {
        self.state
    }

    pub fn has_seen_a_record(&self) -> bool {
        self.has_seen_a_record
    }

    /// Events dropped because their operation kind is not allow-listed.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn close(&mut self) {
        self.state = TailState::Closed;
        self.cursor.release();
    }
}

impl Iterator for ChangeRecords {
    type Item = Result<EmissionRecord, ReplicationError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.state == TailState::Draining && self.cursor.is_alive() {
            if self.stop.is_stopped() {
                tracing::info!(stream = %self.stream, "change stream cancelled");
                break;
            }

            match self.cursor.try_next() {
                Err(e) => {
                    self.close();
                    return Some(Err(source_failure(&self.stream, e)));
                }
                Ok(None) => {
                    if self.has_seen_a_record {
                        tracing::debug!(stream = %self.stream, "change stream caught up");
                        break;
                    }
                    std::thread::sleep(IDLE_POLL_PAUSE);
                }
                Ok(Some(event)) => {
                    if !self.allow_list.contains(&event.operation_type) {
                        tracing::debug!(
                            stream = %self.stream,
                            operation_type = %event.operation_type,
                            "discarding change event"
                        );
                        self.discarded += 1;
                        continue;
                    }
                    self.has_seen_a_record = true;
                    return Some(Ok(EmissionRecord::from_change(
                        event,
                        self.add_record_metadata,
                    )));
                }
            }
        }

        self.close();
        None
    }
}

/// Owns the open cursor and closes it exactly once.
struct CursorGuard {
    cursor: Option<Box<dyn ChangeCursor>>,
}

impl CursorGuard {
    fn new(cursor: Box<dyn ChangeCursor>) -> Self {
        Self {
            cursor: Some(cursor),
        }
    }

    fn is_alive(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| c.is_alive())
    }

    fn try_next(&mut self) -> Result<Option<RawChangeEvent>, SourceError> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.try_next(),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
            tracing::debug!("change stream cursor released");
        }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.release();
    }
}
