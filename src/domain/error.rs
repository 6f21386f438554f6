//! Domain Errors
//!
//! Error taxonomy for bookmark handling and extraction. Configuration
//! defects, ordering violations and rejected resume tokens are fatal;
//! identifier parse failures are recovered by the snapshot reader.

use crate::domain::value_objects::StreamKey;

/// Errors raised by the replication core.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(
        "unrecognized replication method '{method}' for stream '{stream}'; \
         only INCREMENTAL and LOG_BASED replication methods are supported"
    )]
    UnsupportedReplicationMethod { stream: String, method: String },

    #[error("could not detect replication key for '{stream}' stream (replication method={method})")]
    MissingReplicationKey { stream: String, method: String },

    #[error("out-of-order bookmark for {key}: candidate '{candidate}' sorts before stored '{stored}'")]
    OutOfOrder {
        key: StreamKey,
        stored: String,
        candidate: String,
    },

    #[error("replication key value '{value}' cannot be parsed into an ObjectId: {reason}")]
    IdentifierParse { value: String, reason: String },

    #[error("resume token for stream '{stream}' was rejected by the source: {reason}")]
    ResumeTokenRejected {
        stream: String,
        token: String,
        reason: String,
    },

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("bookmark persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

impl ReplicationError {
    /// Whether this error is a configuration defect detectable before any
    /// record is read.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedReplicationMethod { .. } | Self::MissingReplicationKey { .. }
        )
    }
}

/// Errors reported by a source adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("resume token '{token}' rejected: {reason}")]
    ResumeTokenRejected { token: String, reason: String },

    #[error("snapshot query failed: {0}")]
    Query(String),

    #[error("change stream failed: {0}")]
    ChangeStream(String),

    #[error("malformed source document: {0}")]
    MalformedDocument(String),
}

/// Errors reported by a bookmark persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("bookmark backend unavailable: {0}")]
    Unavailable(String),

    #[error("bookmark read failed: {0}")]
    Read(String),

    #[error("bookmark write failed: {0}")]
    Write(String),
}

/// Errors reported by a record sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
