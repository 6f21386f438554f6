//! JSON Lines Record Sink
//!
//! Implements RecordSink by writing one JSON object per line to any
//! `io::Write`. The writer is flushed after every record so that a
//! successful `write` means the record has left the process.

use crate::domain::entities::EmissionRecord;
use crate::domain::error::SinkError;
use crate::domain::ports::RecordSink;
use std::io::Write;

/// Record sink emitting newline-delimited JSON.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write(&mut self, record: &EmissionRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

/// Record sink collecting records in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<EmissionRecord>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }
}

impl RecordSink for VecSink {
    fn write(&mut self, record: &EmissionRecord) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}
