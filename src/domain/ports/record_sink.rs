//! Record Sink Port
//!
//! Receives normalized records leaving the core.

use crate::domain::entities::EmissionRecord;
use crate::domain::error::SinkError;

/// Destination for emitted records.
///
/// A record counts as acknowledged once `write` returns `Ok`; its bookmark
/// is advanced only after that.
pub trait RecordSink {
    fn write(&mut self, record: &EmissionRecord) -> Result<(), SinkError>;
}
