//! Sorted output emission.

use std::io;

use crate::bucket::{BucketError, BucketStore};
use crate::codec::RecordCodec;
use crate::record::Record;
use crate::storage::BucketStorage;

/// Sorted records consumer.
pub trait RecordSink {
    /// Accepts the next record of the sorted stream.
    fn put(&mut self, record: Record) -> io::Result<()>;
}

impl RecordSink for Vec<Record> {
    fn put(&mut self, record: Record) -> io::Result<()> {
        self.push(record);
        return Ok(());
    }
}

impl<K: RecordSink + ?Sized> RecordSink for &mut K {
    fn put(&mut self, record: Record) -> io::Result<()> {
        (**self).put(record)
    }
}

/// Emission error.
#[derive(Debug)]
pub enum EmitError<S: std::error::Error, D: std::error::Error> {
    /// Bucket read error.
    Bucket(BucketError<S, D>),
    /// Output sink error.
    Output(io::Error),
}

impl<S: std::error::Error, D: std::error::Error> From<BucketError<S, D>> for EmitError<S, D> {
    fn from(err: BucketError<S, D>) -> Self {
        EmitError::Bucket(err)
    }
}

/// Emission statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    /// Number of emitted buckets.
    pub buckets: usize,
    /// Number of emitted records.
    pub records: usize,
}

/// Writes leaf buckets to a sink in key order, sorting each bucket in memory.
pub struct Emitter {
    /// Maximum number of records per leaf bucket.
    buffer_budget: usize,
}

impl Emitter {
    pub fn new(buffer_budget: usize) -> Self {
        Emitter { buffer_budget }
    }

    pub fn emit<C, S, K>(
        &self,
        store: &mut BucketStore<'_, C, S>,
        sink: &mut K,
    ) -> Result<EmitStats, EmitError<C::SerializationError, C::DeserializationError>>
    where
        C: RecordCodec,
        S: BucketStorage,
        K: RecordSink + ?Sized,
    {
        let mode = store.mode();
        let mut stats = EmitStats::default();

        for key in store.leaves() {
            let count = store.count_of(&key);

            if count > self.buffer_budget {
                // all records share the sort field, their append order is already sorted
                log::debug!("streaming oversized bucket {} ({} records)", key, count);
                for record in store.records(&key)? {
                    sink.put(record?).map_err(EmitError::Output)?;
                    stats.records += 1;
                }
            } else {
                log::trace!("sorting bucket {} ({} records)", key, count);
                let mut records = store.read_all(&key)?;
                mode.sort(&mut records);

                stats.records += records.len();
                for record in records {
                    sink.put(record).map_err(EmitError::Output)?;
                }
            }

            stats.buckets += 1;
        }

        log::debug!("{} records emitted from {} buckets", stats.records, stats.buckets);

        return Ok(stats);
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::{EmitError, Emitter, RecordSink};
    use crate::bucket::{BucketKey, BucketStore};
    use crate::codec::RmpCodec;
    use crate::record::{Record, SortMode};
    use crate::storage::MemoryStorage;

    struct ClosedSink;

    impl RecordSink for ClosedSink {
        fn put(&mut self, _: Record) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }
    }

    fn fill(store: &mut BucketStore<'_, RmpCodec, MemoryStorage>, records: &[Record], key_len: usize) {
        let mode = store.mode();
        for record in records {
            store.append(&BucketKey::of(record, mode, key_len), record).unwrap();
        }
    }

    #[test]
    fn test_emit_skips_superseded_buckets() {
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByAddress);

        fill(
            &mut store,
            &[
                Record::new("a", "b2"),
                Record::new("b", "a9"),
                Record::new("c", "b1"),
                Record::new("d", "a1"),
            ],
            1,
        );
        // "b" is superseded by children holding one of its records only
        store.supersede(&BucketKey::new("b", 1));
        fill(&mut store, &[Record::new("c", "b1")], 2);

        let mut sink = Vec::new();
        let stats = Emitter::new(10).emit(&mut store, &mut sink).unwrap();

        assert_eq!(stats.buckets, 2);
        assert_eq!(
            sink,
            vec![Record::new("d", "a1"), Record::new("b", "a9"), Record::new("c", "b1")]
        );
    }

    #[test]
    fn test_emit_streams_oversized_bucket() {
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        let records: Vec<Record> = (0..5).map(|i| Record::new("x", i.to_string())).collect();
        fill(&mut store, &records, 2);

        let mut sink = Vec::new();
        let stats = Emitter::new(2).emit(&mut store, &mut sink).unwrap();

        assert_eq!(stats.records, 5);
        assert_eq!(sink, records);
    }

    #[test]
    fn test_emit_output_error() {
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);
        fill(&mut store, &[Record::new("x", "")], 2);

        let result = Emitter::new(2).emit(&mut store, &mut ClosedSink);

        assert!(matches!(result, Err(EmitError::Output(err)) if err.kind() == io::ErrorKind::BrokenPipe));
    }
}
