//! Extraction Engine - one stream's replication use case
//!
//! Resolves the stream's position from the bookmark store, opens the reader
//! for its replication mode, and hands each record to the sink before the
//! position is acknowledged. This is the primary interface for callers.

use crate::domain::entities::{EmissionRecord, ExtractionSettings, StreamDescriptor};
use crate::domain::error::ReplicationError;
use crate::domain::ports::{ChangeLogSource, RecordSink, SnapshotSource};
use crate::domain::services::{
    BookmarkStore, ChangeRecords, OrderedSnapshotReader, SnapshotRecords, TailingLogReader,
};
use crate::domain::value_objects::{Bookmark, ReplicationMode};
use crate::infrastructure::shutdown::StopSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reader selected once from the stream's replication mode.
enum Reader {
    Snapshot(OrderedSnapshotReader),
    Tailing(TailingLogReader),
}

/// Outcome of [`ExtractionEngine::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    /// Records written to the sink and acknowledged
    pub emitted: u64,
    /// Change events dropped by the operation allow-list
    pub discarded: u64,
    /// The run ended because the stop signal was raised
    pub cancelled: bool,
    /// Position after the run
    pub bookmark: Option<Bookmark>,
}

/// Extraction engine for a single stream.
///
/// Configuration defects (unknown replication method, missing replication
/// key) surface from [`ExtractionEngine::new`], before anything is read.
pub struct ExtractionEngine {
    stream: StreamDescriptor,
    mode: ReplicationMode,
    is_sorted: bool,
    reader: Reader,
    store: Arc<BookmarkStore>,
    /// Set when the stored bookmark was discarded; the next acknowledgement
    /// replaces it without an ordering check.
    resync_pending: AtomicBool,
}

impl ExtractionEngine {
    pub fn new<S>(
        stream: StreamDescriptor,
        settings: &ExtractionSettings,
        source: Arc<S>,
        store: Arc<BookmarkStore>,
    ) -> Result<Self, ReplicationError>
    where
        S: SnapshotSource + ChangeLogSource + 'static,
    {
        let mode = ReplicationMode::from_declared(&stream.name, &stream.replication_method)?;

        let reader = match mode {
            ReplicationMode::Incremental => {
                if stream.replication_key().is_none() {
                    return Err(ReplicationError::MissingReplicationKey {
                        stream: stream.name.clone(),
                        method: stream.replication_method.clone(),
                    });
                }
                Reader::Snapshot(OrderedSnapshotReader::new(source, settings))
            }
            ReplicationMode::LogBased => {
                if settings.operation_types.is_empty() {
                    tracing::warn!(
                        stream = %stream.name,
                        "operation type allow-list is empty; every change event will be discarded"
                    );
                }
                Reader::Tailing(TailingLogReader::new(source, settings))
            }
        };

        // Partitioned positions are not comparable across partitions.
        let is_sorted = mode == ReplicationMode::Incremental && stream.partition.is_none();

        Ok(Self {
            stream,
            mode,
            is_sorted,
            reader,
            store,
            resync_pending: AtomicBool::new(false),
        })
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    /// Whether acknowledged positions must be non-decreasing.
    pub fn is_sorted(&self) -> bool {
        self.is_sorted
    }

    /// Open the record sequence at the stored position.
    ///
    /// Callers must [`acknowledge`](Self::acknowledge) each record once it
    /// has been handed off, or the next invocation will replay it.
    pub fn records(&self, stop: &StopSignal) -> Result<RecordStream, ReplicationError> {
        let bookmark = self.store.get(&self.stream.key())?;
        match &self.reader {
            Reader::Snapshot(reader) => {
                let records = reader.read(bookmark.as_ref())?;
                self.resync_pending
                    .store(records.bookmark_discarded(), Ordering::SeqCst);
                Ok(RecordStream::Snapshot(records))
            }
            Reader::Tailing(reader) => Ok(RecordStream::Tailing(reader.open(
                &self.stream.name,
                bookmark.as_ref(),
                stop.clone(),
            )?)),
        }
    }

    /// Record `record` as the stream's new position.
    pub fn acknowledge(&self, record: &EmissionRecord) -> Result<(), ReplicationError> {
        let resync = self.resync_pending.load(Ordering::SeqCst);
        if resync {
            tracing::info!(
                stream = %self.stream.name,
                bookmark = %record.id,
                "replacing discarded bookmark"
            );
        }
        self.store.advance(
            &self.stream,
            Bookmark::new(record.id.clone()),
            self.is_sorted && !resync,
        )?;
        self.resync_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Drive the stream to completion into `sink`.
    ///
    /// Each record is acknowledged only after the sink accepted it; at most
    /// one record is ever in flight.
    pub fn run(
        &self,
        sink: &mut dyn RecordSink,
        stop: &StopSignal,
    ) -> Result<SyncSummary, ReplicationError> {
        tracing::info!(
            stream = %self.stream.name,
            mode = %self.mode,
            "starting sync"
        );

        let mut records = self.records(stop)?;
        let mut summary = SyncSummary::default();

        while !stop.is_stopped() {
            let Some(record) = records.next() else {
                break;
            };
            let record = record?;
            sink.write(&record)?;
            self.acknowledge(&record)?;
            summary.emitted += 1;
        }

        summary.discarded = records.discarded();
        summary.cancelled = stop.is_stopped();
        drop(records);
        summary.bookmark = self.store.get(&self.stream.key())?;

        tracing::info!(
            stream = %self.stream.name,
            emitted = summary.emitted,
            discarded = summary.discarded,
            cancelled = summary.cancelled,
            "finished sync"
        );
        Ok(summary)
    }
}

/// Records of one invocation, whichever mode produced them.
pub enum RecordStream {
    Snapshot(SnapshotRecords),
    Tailing(ChangeRecords),
}

impl RecordStream {
    /// Events dropped by the allow-list so far. Always zero for snapshots.
    pub fn discarded(&self) -> u64 {
        match self {
            Self::Snapshot(_) => 0,
            Self::Tailing(records) => records.discarded(),
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<EmissionRecord, ReplicationError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Snapshot(records) => records.next(),
            Self::Tailing(records) => records.next(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::{DashMapBookmarkBackend, MemoryCollection, VecSink};
    use crate::domain::error::SinkError;
    use crate::domain::ports::BookmarkBackend;
    use crate::domain::value_objects::StreamKey;
    use bson::doc;
    use bson::oid::ObjectId;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        ObjectId::from_bytes(bytes)
    }

    fn collection_with(n: u8) -> Arc<MemoryCollection> {
        let collection = Arc::new(MemoryCollection::new("shop", "orders"));
        for i in 1..=n {
            collection.insert(doc! { "_id": oid(i), "n": i as i32 });
        }
        collection
    }

    fn engine(
        stream: StreamDescriptor,
        collection: Arc<MemoryCollection>,
        backend: Arc<DashMapBookmarkBackend>,
    ) -> Result<ExtractionEngine, ReplicationError> {
        let store = Arc::new(BookmarkStore::new(backend));
        ExtractionEngine::new(stream, &ExtractionSettings::default(), collection, store)
    }

    #[test]
    fn test_unknown_method_rejected_at_construction() {
        let result = engine(
            StreamDescriptor::new("shop_orders", "FULL_TABLE"),
            collection_with(1),
            Arc::new(DashMapBookmarkBackend::new()),
        );
        let err = result.err().unwrap();
        assert!(err.is_configuration());
        assert!(matches!(err, ReplicationError::UnsupportedReplicationMethod { .. }));
    }

    #[test]
    fn test_incremental_without_key_rejected() {
        let stream = StreamDescriptor::new("shop_orders", "INCREMENTAL").with_replication_key(None);
        let result = engine(stream, collection_with(1), Arc::new(DashMapBookmarkBackend::new()));
        assert!(matches!(
            result,
            Err(ReplicationError::MissingReplicationKey { .. })
        ));
    }

    #[test]
    fn test_log_based_does_not_need_key() {
        let stream = StreamDescriptor::new("shop_orders", "log-based").with_replication_key(None);
        let engine = engine(stream, collection_with(0), Arc::new(DashMapBookmarkBackend::new())).unwrap();
        assert_eq!(engine.mode(), ReplicationMode::LogBased);
        assert!(!engine.is_sorted());
    }

    #[test]
    fn test_sorted_only_for_unpartitioned_incremental() {
        let plain = engine(
            StreamDescriptor::new("s", "INCREMENTAL"),
            collection_with(0),
            Arc::new(DashMapBookmarkBackend::new()),
        )
        .unwrap();
        let partitioned = engine(
            StreamDescriptor::new("s", "INCREMENTAL").with_partition("tenant-1"),
            collection_with(0),
            Arc::new(DashMapBookmarkBackend::new()),
        )
        .unwrap();
        assert!(plain.is_sorted());
        assert!(!partitioned.is_sorted());
    }

    #[test]
    fn test_incremental_run_then_idempotent_rerun() {
        let backend = Arc::new(DashMapBookmarkBackend::new());
        let engine = engine(
            StreamDescriptor::new("shop_orders", "INCREMENTAL"),
            collection_with(3),
            backend.clone(),
        )
        .unwrap();
        let stop = StopSignal::new();

        let mut sink = VecSink::new();
        let first = engine.run(&mut sink, &stop).unwrap();
        assert_eq!(first.emitted, 3);
        assert_eq!(first.bookmark, Some(Bookmark::new(oid(3).to_hex())));
        assert_eq!(sink.ids(), vec![oid(1).to_hex(), oid(2).to_hex(), oid(3).to_hex()]);

        let mut again = VecSink::new();
        let second = engine.run(&mut again, &stop).unwrap();
        assert_eq!(second.emitted, 0);
        assert!(again.records.is_empty());
        assert_eq!(
            backend.load(&StreamKey::stream("shop_orders")).unwrap(),
            Some(Bookmark::new(oid(3).to_hex()))
        );
    }

    #[test]
    fn test_sink_failure_leaves_bookmark_unadvanced() {
        struct FailingSink;
        impl RecordSink for FailingSink {
            fn write(&mut self, _record: &EmissionRecord) -> Result<(), SinkError> {
                Err(SinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "closed",
                )))
            }
        }

        let backend = Arc::new(DashMapBookmarkBackend::new());
        let engine = engine(
            StreamDescriptor::new("shop_orders", "INCREMENTAL"),
            collection_with(2),
            backend.clone(),
        )
        .unwrap();

        let result = engine.run(&mut FailingSink, &StopSignal::new());
        assert!(matches!(result, Err(ReplicationError::Sink(_))));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_stopped_before_start_emits_nothing() {
        let engine = engine(
            StreamDescriptor::new("shop_orders", "INCREMENTAL"),
            collection_with(2),
            Arc::new(DashMapBookmarkBackend::new()),
        )
        .unwrap();
        let stop = StopSignal::new();
        stop.stop();

        let mut sink = VecSink::new();
        let summary = engine.run(&mut sink, &stop).unwrap();
        assert_eq!(summary.emitted, 0);
        assert!(summary.cancelled);
        assert!(summary.bookmark.is_none());
    }

    #[test]
    fn test_log_based_resumes_and_drains() {
        let collection = Arc::new(MemoryCollection::new("shop", "orders"));
        let start = collection.insert(doc! { "n": 1 });
        let second = collection.insert(doc! { "n": 2 });
        collection.drop_collection();

        let backend = Arc::new(
            DashMapBookmarkBackend::new().with_bookmark(StreamKey::stream("shop_orders"), start),
        );
        let engine = engine(
            StreamDescriptor::new("shop_orders", "LOG_BASED"),
            collection,
            backend,
        )
        .unwrap();

        let mut sink = VecSink::new();
        let summary = engine.run(&mut sink, &StopSignal::new()).unwrap();

        assert_eq!(sink.ids(), vec![second.clone()]);
        assert_eq!(summary.emitted, 1);
        // drop and invalidate are not allow-listed
        assert_eq!(summary.discarded, 2);
        assert_eq!(summary.bookmark, Some(Bookmark::new(second)));
    }

    #[test]
    fn test_unparseable_bookmark_resyncs_from_start_date() {
        let backend = Arc::new(
            DashMapBookmarkBackend::new().with_bookmark(StreamKey::stream("shop_orders"), "zzzz"),
        );
        let engine = engine(
            StreamDescriptor::new("shop_orders", "INCREMENTAL"),
            collection_with(3),
            backend.clone(),
        )
        .unwrap();

        let mut sink = VecSink::new();
        let summary = engine.run(&mut sink, &StopSignal::new()).unwrap();

        assert_eq!(summary.emitted, 3);
        assert_eq!(sink.ids(), vec![oid(1).to_hex(), oid(2).to_hex(), oid(3).to_hex()]);
        assert_eq!(summary.bookmark, Some(Bookmark::new(oid(3).to_hex())));
        assert_eq!(
            backend.load(&StreamKey::stream("shop_orders")).unwrap(),
            Some(Bookmark::new(oid(3).to_hex()))
        );
    }

    #[test]
    fn test_ordering_enforced_again_after_resync() {
        let backend = Arc::new(
            DashMapBookmarkBackend::new().with_bookmark(StreamKey::stream("shop_orders"), "zzzz"),
        );
        let engine = engine(
            StreamDescriptor::new("shop_orders", "INCREMENTAL"),
            collection_with(2),
            backend,
        )
        .unwrap();

        let mut records = engine.records(&StopSignal::new()).unwrap();
        let first = records.next().unwrap().unwrap();
        let second = records.next().unwrap().unwrap();
        engine.acknowledge(&second).unwrap();

        let result = engine.acknowledge(&first);
        assert!(matches!(result, Err(ReplicationError::OutOfOrder { .. })));
    }

    #[test]
    fn test_records_and_acknowledge_by_hand() {
        let backend = Arc::new(DashMapBookmarkBackend::new());
        let engine = engine(
            StreamDescriptor::new("shop_orders", "INCREMENTAL"),
            collection_with(2),
            backend.clone(),
        )
        .unwrap();

        let mut records = engine.records(&StopSignal::new()).unwrap();
        let first = records.next().unwrap().unwrap();
        engine.acknowledge(&first).unwrap();
        drop(records);

        let remaining: Vec<String> = engine
            .records(&StopSignal::new())
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(remaining, vec![oid(2).to_hex()]);
    }
}
