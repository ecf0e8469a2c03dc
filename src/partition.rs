//! Record stream partitioning.
//!
//! Records are routed into buckets keyed by a prefix of the sort field. Any bucket holding more records than
//! the buffer budget is read back and routed again using a prefix one character longer, until every bucket
//! fits the budget or cannot be divided any further.
//!
//! Buckets are only ever split by extending their prefix, so for two leaf buckets with keys `k1 < k2` every
//! record of the first bucket sorts no later than any record of the second one. Sorting each leaf
//! independently and emitting leaves in key order produces a totally ordered stream.

use std::collections::BTreeSet;

use crate::bucket::{BucketError, BucketKey, BucketStore};
use crate::codec::RecordCodec;
use crate::record::Record;
use crate::storage::BucketStorage;

/// Partitioning statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Number of records read from the input.
    pub records: usize,
    /// Number of re-partitioned buckets.
    pub splits: usize,
    /// Longest key length used.
    pub max_key_len: usize,
    /// Number of over-budget buckets that could not be divided.
    pub oversized: usize,
}

/// Bucketing partitioner.
pub struct Partitioner {
    /// Maximum number of records per leaf bucket.
    buffer_budget: usize,
    /// Key length used for the input stream.
    initial_key_len: usize,
}

impl Partitioner {
    pub fn new(buffer_budget: usize, initial_key_len: usize) -> Self {
        Partitioner {
            buffer_budget,
            initial_key_len,
        }
    }

    /// Partitions the input stream into budget-respecting buckets.
    pub fn partition<C, S, I, E>(&self, store: &mut BucketStore<'_, C, S>, input: I) -> Result<PartitionStats, E>
    where
        C: RecordCodec,
        S: BucketStorage,
        I: IntoIterator<Item = Result<Record, E>>,
        E: From<BucketError<C::SerializationError, C::DeserializationError>>,
    {
        let mut stats = PartitionStats {
            max_key_len: self.initial_key_len,
            ..PartitionStats::default()
        };

        let touched = Self::route(store, input.into_iter(), self.initial_key_len, &mut stats.records)?;
        log::debug!(
            "{} records routed into {} buckets (key length: {})",
            stats.records,
            touched.len(),
            self.initial_key_len
        );

        self.refine(store, touched.into_iter().collect(), &mut stats)?;

        return Ok(stats);
    }

    /// Appends every record to its bucket. Returns the keys of the buckets touched.
    fn route<C, S, I, E>(
        store: &mut BucketStore<'_, C, S>,
        records: I,
        key_len: usize,
        routed: &mut usize,
    ) -> Result<BTreeSet<BucketKey>, E>
    where
        C: RecordCodec,
        S: BucketStorage,
        I: Iterator<Item = Result<Record, E>>,
        E: From<BucketError<C::SerializationError, C::DeserializationError>>,
    {
        let mode = store.mode();
        let mut touched = BTreeSet::new();

        for record in records {
            let record = record?;
            let key = BucketKey::of(&record, mode, key_len);
            store.append(&key, &record)?;
            touched.insert(key);
            *routed += 1;
        }

        return Ok(touched);
    }

    /// Splits over-budget buckets into children until every pending bucket fits the budget or can't be divided.
    ///
    /// Pending keys are kept on an explicit stack, so the split depth is not limited by the call stack.
    fn refine<C, S>(
        &self,
        store: &mut BucketStore<'_, C, S>,
        mut pending: Vec<BucketKey>,
        stats: &mut PartitionStats,
    ) -> Result<(), BucketError<C::SerializationError, C::DeserializationError>>
    where
        C: RecordCodec,
        S: BucketStorage,
    {
        while let Some(key) = pending.pop() {
            let bucket = match store.get(&key) {
                Some(bucket) if bucket.count() > self.buffer_budget => bucket,
                _ => continue,
            };

            if !bucket.is_divisible() {
                log::warn!(
                    "bucket {} holds {} records with an identical key, exceeding the budget of {}",
                    key,
                    bucket.count(),
                    self.buffer_budget
                );
                stats.oversized += 1;
                continue;
            }

            let key_len = key.key_len() + 1;
            log::debug!(
                "splitting bucket {} ({} records) with key length {}",
                key,
                bucket.count(),
                key_len
            );

            store.supersede(&key);
            stats.splits += 1;
            stats.max_key_len = stats.max_key_len.max(key_len);

            let records = store.records(&key)?;
            let mut routed = 0;
            let children = Self::route(store, records, key_len, &mut routed)?;

            // visit order does not affect the resulting leaves
            pending.extend(children);
        }

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::Partitioner;
    use crate::bucket::{BucketError, BucketKey, BucketStore};
    use crate::codec::RmpCodec;
    use crate::record::{Record, SortMode};
    use crate::storage::MemoryStorage;

    type Error = BucketError<rmp_serde::encode::Error, rmp_serde::decode::Error>;

    fn input(records: &[Record]) -> Vec<Result<Record, Error>> {
        records.iter().cloned().map(Ok).collect()
    }

    #[test]
    fn test_partition_within_budget() {
        let records = vec![
            Record::new("bob", "1 Elm"),
            Record::new("al", "2 Oak"),
            Record::new("ann", "3 Pine"),
        ];
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        let stats = Partitioner::new(18, 2).partition(&mut store, input(&records)).unwrap();

        assert_eq!(stats.records, 3);
        assert_eq!(stats.splits, 0);
        assert_eq!(
            store.leaves(),
            vec![BucketKey::new("al", 2), BucketKey::new("an", 2), BucketKey::new("bo", 2)]
        );
    }

    #[rstest]
    #[case(10)]
    #[case(3)]
    #[case(1)]
    fn test_partition_shared_prefix(#[case] budget: usize) {
        let records: Vec<Record> = (0..1000)
            .map(|i| Record::new(format!("aa{:03}", (i * 7) % 1000), i.to_string()))
            .collect();
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        let stats = Partitioner::new(budget, 2).partition(&mut store, input(&records)).unwrap();

        assert_eq!(stats.records, 1000);
        assert!(stats.max_key_len > 2);
        assert_eq!(stats.oversized, 0);

        let leaves = store.leaves();
        assert!(leaves.iter().all(|key| store.count_of(key) <= budget));
        assert_eq!(leaves.iter().map(|key| store.count_of(key)).sum::<usize>(), 1000);
    }

    #[test]
    fn test_partition_field_equal_to_prefix() {
        let mut records = vec![Record::new("ab", "x"); 3];
        records.extend(vec![Record::new("abc", "y"); 2]);
        records.push(Record::new("abd", "z"));

        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        let stats = Partitioner::new(3, 2).partition(&mut store, input(&records)).unwrap();

        assert_eq!(stats.splits, 1);
        assert_eq!(
            store.leaves(),
            vec![BucketKey::new("ab", 3), BucketKey::new("abc", 3), BucketKey::new("abd", 3)]
        );
        assert_eq!(store.count_of(&BucketKey::new("ab", 3)), 3);
        assert!(store.get(&BucketKey::new("ab", 2)).unwrap().is_superseded());
    }

    #[test]
    fn test_partition_indivisible_bucket() {
        let records = vec![Record::new("same", "addr"); 5];
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        let stats = Partitioner::new(2, 2).partition(&mut store, input(&records)).unwrap();

        // "sa" -> "sam" -> "same", which cannot be divided any further
        assert_eq!(stats.oversized, 1);
        let leaves = store.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].prefix(), "same");
        assert_eq!(store.count_of(&leaves[0]), 5);
    }

    #[test]
    fn test_partition_long_shared_prefix() {
        let prefix = "x".repeat(4000);
        let records = vec![
            Record::new(format!("{}b", prefix), "2"),
            Record::new(format!("{}a", prefix), "1"),
        ];

        // a small stack fails unless the split depth is independent of the call depth
        let handle = std::thread::Builder::new()
            .stack_size(512 * 1024)
            .spawn(move || {
                let mut storage = MemoryStorage::new();
                let codec = RmpCodec;
                let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

                let stats = Partitioner::new(1, 2).partition(&mut store, input(&records)).unwrap();
                (stats, store.leaves())
            })
            .unwrap();
        let (stats, leaves) = handle.join().unwrap();

        assert_eq!(stats.max_key_len, 4001);
        assert_eq!(stats.splits, 3999);
        assert_eq!(stats.oversized, 0);
        assert_eq!(leaves.len(), 2);
        assert!(leaves[0].prefix().ends_with('a'));
        assert!(leaves[1].prefix().ends_with('b'));
    }

    #[test]
    fn test_partition_input_error() {
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        let input: Vec<Result<Record, Error>> = vec![
            Ok(Record::new("bob", "")),
            Err(BucketError::Storage {
                key: BucketKey::new("input", 0),
                source: io::Error::new(io::ErrorKind::Other, "broken input"),
            }),
        ];

        let err = Partitioner::new(2, 2).partition(&mut store, input).unwrap_err();
        assert_eq!(err.key(), &BucketKey::new("input", 0));
    }
}
