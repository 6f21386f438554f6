//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use crate::domain::error::ReplicationError;
use bson::oid::ObjectId;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// How a stream is replicated.
///
/// Selected once per run from the stream declaration and never changed
/// while the run is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// Ordered scan over ascending ObjectIds.
    Incremental,
    /// Change stream tailing, resumed from an opaque token.
    LogBased,
}

impl ReplicationMode {
    /// Parse a declared replication method.
    ///
    /// Accepts `INCREMENTAL` and `LOG_BASED` in any case, with `-` allowed
    /// in place of `_`. Anything else is `None`.
    pub fn parse(method: &str) -> Option<Self> {
        match method.trim().to_uppercase().replace('-', "_").as_str() {
            "INCREMENTAL" => Some(Self::Incremental),
            "LOG_BASED" => Some(Self::LogBased),
            _ => None,
        }
    }

    /// Resolve the mode declared for `stream`, failing on unknown methods.
    pub fn from_declared(stream: &str, method: &str) -> Result<Self, ReplicationError> {
        Self::parse(method).ok_or_else(|| ReplicationError::UnsupportedReplicationMethod {
            stream: stream.to_string(),
            method: method.to_string(),
        })
    }

    /// Canonical declaration string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "INCREMENTAL",
            Self::LogBased => "LOG_BASED",
        }
    }
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted replication position for one stream partition.
///
/// For incremental streams this is the hex rendering of an ObjectId and
/// compares lexically in the source's native order. For log-based streams
/// it is a resume token and only has meaning to the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Bookmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key under which a bookmark is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub stream: String,
    /// Partition key when state partitioning is enabled.
    pub partition: Option<String>,
}

impl StreamKey {
    pub fn new(stream: impl Into<String>, partition: Option<String>) -> Self {
        Self {
            stream: stream.into(),
            partition,
        }
    }

    /// Key for an unpartitioned stream.
    pub fn stream(stream: impl Into<String>) -> Self {
        Self::new(stream, None)
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.partition {
            Some(partition) => write!(f, "{}[{}]", self.stream, partition),
            None => write!(f, "{}", self.stream),
        }
    }
}

/// Build the smallest ObjectId whose embedded timestamp is `at`.
///
/// The first four bytes hold the big-endian seconds since the epoch and the
/// remaining eight are zero. Times outside the 32-bit range are clamped.
pub fn object_id_from_datetime(at: DateTime<Utc>) -> ObjectId {
    let secs = at.timestamp().clamp(0, i64::from(u32::MAX)) as u32;
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&secs.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

/// Parse a configured timestamp into UTC.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` / `YYYY-MM-DD HH:MM:SS`
/// (read as UTC) and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Earliest start point an incremental stream can use.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    // ===== ReplicationMode Tests =====

    #[test]
    fn test_mode_parse_canonical() {
        assert_eq!(
            ReplicationMode::parse("INCREMENTAL"),
            Some(ReplicationMode::Incremental)
        );
        assert_eq!(
            ReplicationMode::parse("LOG_BASED"),
            Some(ReplicationMode::LogBased)
        );
    }

    #[test]
    fn test_mode_parse_lenient_spelling() {
        assert_eq!(
            ReplicationMode::parse("incremental"),
            Some(ReplicationMode::Incremental)
        );
        assert_eq!(
            ReplicationMode::parse("log-based"),
            Some(ReplicationMode::LogBased)
        );
        assert_eq!(
            ReplicationMode::parse(" Log_Based "),
            Some(ReplicationMode::LogBased)
        );
    }

    #[test]
    fn test_mode_parse_unknown() {
        for input in ["FULL_TABLE", "", "logbased", "snapshot"] {
            assert_eq!(ReplicationMode::parse(input), None, "input: {}", input);
        }
    }

    #[test]
    fn test_mode_from_declared_error_names_stream() {
        let err = ReplicationMode::from_declared("shop_orders", "FULL_TABLE").unwrap_err();
        match err {
            ReplicationError::UnsupportedReplicationMethod { stream, method } => {
                assert_eq!(stream, "shop_orders");
                assert_eq!(method, "FULL_TABLE");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ReplicationMode::Incremental.to_string(), "INCREMENTAL");
        assert_eq!(ReplicationMode::LogBased.to_string(), "LOG_BASED");
    }

    // ===== StreamKey Tests =====

    #[test]
    fn test_stream_key_display() {
        assert_eq!(StreamKey::stream("db_users").to_string(), "db_users");
        assert_eq!(
            StreamKey::new("db_users", Some("tenant-7".to_string())).to_string(),
            "db_users[tenant-7]"
        );
    }

    #[test]
    fn test_stream_key_partitions_are_distinct() {
        let a = StreamKey::new("s", Some("a".to_string()));
        let b = StreamKey::new("s", Some("b".to_string()));
        assert_ne!(a, b);
        assert_ne!(a, StreamKey::stream("s"));
    }

    // ===== ObjectId Tests =====

    #[test]
    fn test_object_id_from_epoch_is_zero() {
        assert_eq!(
            object_id_from_datetime(epoch()).to_hex(),
            "000000000000000000000000"
        );
    }

    #[test]
    fn test_object_id_from_datetime_prefix() {
        let at = parse_timestamp("2023-01-01T00:00:00Z").unwrap();
        let oid = object_id_from_datetime(at);
        // 1672531200 == 0x63B0CD00
        assert_eq!(oid.to_hex(), "63b0cd000000000000000000");
        assert_eq!(oid.timestamp().timestamp_millis(), 1_672_531_200_000);
    }

    #[test]
    fn test_object_id_before_epoch_clamps() {
        let at = parse_timestamp("1900-06-01").unwrap();
        assert_eq!(
            object_id_from_datetime(at).to_hex(),
            "000000000000000000000000"
        );
    }

    #[test]
    fn test_object_id_hex_order_follows_time() {
        let earlier = object_id_from_datetime(parse_timestamp("2020-01-01").unwrap());
        let later = object_id_from_datetime(parse_timestamp("2021-01-01").unwrap());
        assert!(earlier.to_hex() < later.to_hex());
    }

    // ===== Timestamp Parsing Tests =====

    #[test]
    fn test_parse_date_only() {
        let dt = parse_timestamp("1970-01-01").unwrap();
        assert_eq!(dt, epoch());
    }

    #[test]
    fn test_parse_naive_datetime() {
        let dt = parse_timestamp("2024-03-05T10:11:12").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-05T10:11:12+00:00");
        let spaced = parse_timestamp("2024-03-05 10:11:12").unwrap();
        assert_eq!(dt, spaced);
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_timestamp("2024-03-05T12:00:00+02:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-05T10:00:00+00:00");
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "yesterday", "2024-13-01", "01/02/2024"] {
            assert!(parse_timestamp(input).is_none(), "input: {}", input);
        }
    }
}
