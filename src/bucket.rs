//! Bucket table backed by storage logs.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};

use crate::codec::RecordCodec;
use crate::record::{bucket_key, Record, SortMode};
use crate::storage::{BucketStorage, LogId};

/// Bucket key: a prefix of the sort field together with the key length it was taken at.
///
/// Keys order by prefix first, so sorting keys sorts buckets in field order.
/// A field shorter than the key length is its own prefix, that's why the length is a part of the key:
/// the bucket `"ab"` split with key length 3 gets a child `"ab"` holding records whose field is exactly `"ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    prefix: String,
    key_len: usize,
}

impl BucketKey {
    pub fn new(prefix: impl Into<String>, key_len: usize) -> Self {
        BucketKey {
            prefix: prefix.into(),
            key_len,
        }
    }

    /// Derives the key of a record.
    pub fn of(record: &Record, mode: SortMode, key_len: usize) -> Self {
        BucketKey::new(bucket_key(record, mode, key_len), key_len)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }
}

impl Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.prefix, self.key_len)
    }
}

/// Bucket state.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    /// Backing log, [`None`] once removed.
    log: Option<LogId>,
    /// Number of appended records.
    count: usize,
    /// Whether some record's field is longer than the bucket prefix.
    divisible: bool,
    /// Whether the bucket was re-partitioned into children.
    superseded: bool,
}

impl Bucket {
    pub fn count(&self) -> usize {
        self.count
    }

    /// A bucket is divisible if a longer key would route its records to more than one child.
    /// Records of an indivisible bucket all have the same sort field.
    pub fn is_divisible(&self) -> bool {
        self.divisible
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded
    }
}

/// Bucket operation error.
#[derive(Debug)]
pub enum BucketError<S: Error, D: Error> {
    /// Bucket log storage error.
    Storage { key: BucketKey, source: io::Error },
    /// Record serialization error.
    Serialization { key: BucketKey, source: S },
    /// Record deserialization error.
    Deserialization { key: BucketKey, source: D },
}

impl<S: Error, D: Error> BucketError<S, D> {
    /// Returns the key of the bucket the error occurred on.
    pub fn key(&self) -> &BucketKey {
        match self {
            BucketError::Storage { key, .. } => key,
            BucketError::Serialization { key, .. } => key,
            BucketError::Deserialization { key, .. } => key,
        }
    }
}

impl<S, D> Error for BucketError<S, D>
where
    S: Error + 'static,
    D: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match self {
            BucketError::Storage { source, .. } => source,
            BucketError::Serialization { source, .. } => source,
            BucketError::Deserialization { source, .. } => source,
        })
    }
}

impl<S: Error, D: Error> Display for BucketError<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketError::Storage { key, source } => write!(f, "bucket {} storage error: {}", key, source),
            BucketError::Serialization { key, source } => {
                write!(f, "bucket {} record serialization error: {}", key, source)
            }
            BucketError::Deserialization { key, source } => {
                write!(f, "bucket {} record deserialization error: {}", key, source)
            }
        }
    }
}

/// Bucket error type of a codec.
pub type StoreError<C> =
    BucketError<<C as RecordCodec>::SerializationError, <C as RecordCodec>::DeserializationError>;

/// Bucket store. Maps bucket keys to storage logs for the duration of a single sort run.
///
/// Every log the store creates is deleted when the store is released or dropped,
/// whether the bucket was emitted or not.
pub struct BucketStore<'a, C: RecordCodec, S: BucketStorage> {
    storage: &'a mut S,
    codec: &'a C,
    mode: SortMode,
    buckets: BTreeMap<BucketKey, Bucket>,
    /// Record encoding scratch buffer.
    buf: Vec<u8>,
}

impl<'a, C: RecordCodec, S: BucketStorage> BucketStore<'a, C, S> {
    pub fn new(storage: &'a mut S, codec: &'a C, mode: SortMode) -> Self {
        BucketStore {
            storage,
            codec,
            mode,
            buckets: BTreeMap::new(),
            buf: Vec::new(),
        }
    }

    /// Returns the backing log of a bucket, creating the bucket on first use.
    pub fn ensure(&mut self, key: &BucketKey) -> Result<LogId, StoreError<C>> {
        if let Some(log) = self.buckets.get(key).and_then(|bucket| bucket.log) {
            return Ok(log);
        }

        let log = self.storage.create(key.prefix()).map_err(|err| BucketError::Storage {
            key: key.clone(),
            source: err,
        })?;
        self.buckets.entry(key.clone()).or_default().log = Some(log);

        return Ok(log);
    }

    /// Appends a record to a bucket.
    pub fn append(&mut self, key: &BucketKey, record: &Record) -> Result<(), StoreError<C>> {
        let log = self.ensure(key)?;

        self.buf.clear();
        self.codec
            .encode(record, &mut self.buf)
            .map_err(|err| BucketError::Serialization {
                key: key.clone(),
                source: err,
            })?;
        self.storage.append(log, &self.buf).map_err(|err| BucketError::Storage {
            key: key.clone(),
            source: err,
        })?;

        let divisible = self.mode.field(record).len() > key.prefix().len();
        let bucket = self.buckets.entry(key.clone()).or_default();
        bucket.count += 1;
        bucket.divisible |= divisible;

        return Ok(());
    }

    /// Returns the number of records in a bucket, `0` for an unknown key.
    pub fn count_of(&self, key: &BucketKey) -> usize {
        self.buckets.get(key).map_or(0, |bucket| bucket.count)
    }

    pub fn get(&self, key: &BucketKey) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    /// Marks a bucket as superseded by its children. Superseded buckets are never emitted.
    pub fn supersede(&mut self, key: &BucketKey) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.superseded = true;
        }
    }

    /// Returns a streaming reader over the records of a bucket, in append order.
    pub fn records(&mut self, key: &BucketKey) -> Result<BucketReader<'a, C>, StoreError<C>> {
        let log = self.existing_log(key)?;
        let reader = self.storage.open(log).map_err(|err| BucketError::Storage {
            key: key.clone(),
            source: err,
        })?;

        return Ok(BucketReader {
            key: key.clone(),
            reader,
            codec: self.codec,
        });
    }

    /// Reads all records of a bucket into memory, in append order.
    pub fn read_all(&mut self, key: &BucketKey) -> Result<Vec<Record>, StoreError<C>> {
        let mut records = Vec::with_capacity(self.count_of(key));
        for record in self.records(key)? {
            records.push(record?);
        }

        return Ok(records);
    }

    /// Deletes the backing log of a bucket. Removing an already removed or unknown bucket is a no-op.
    pub fn remove(&mut self, key: &BucketKey) -> Result<(), StoreError<C>> {
        let log = match self.buckets.get_mut(key).and_then(|bucket| bucket.log.take()) {
            Some(log) => log,
            None => return Ok(()),
        };

        self.storage.delete(log).map_err(|err| BucketError::Storage {
            key: key.clone(),
            source: err,
        })
    }

    /// Deletes the backing logs of all buckets. Failures are logged and counted, never propagated.
    pub fn release(&mut self) -> usize {
        let keys: Vec<BucketKey> = self.buckets.keys().cloned().collect();
        let mut failures = 0;

        for key in keys {
            if let Err(err) = self.remove(&key) {
                log::warn!("bucket cleanup failed: {}", err);
                failures += 1;
            }
        }

        return failures;
    }

    /// Returns keys of the buckets to be emitted (not superseded by children), in key order.
    pub fn leaves(&self) -> Vec<BucketKey> {
        self.buckets
            .iter()
            .filter(|(_, bucket)| !bucket.superseded)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns the number of buckets created during the run.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn mode(&self) -> SortMode {
        self.mode
    }

    fn existing_log(&self, key: &BucketKey) -> Result<LogId, StoreError<C>> {
        self.buckets
            .get(key)
            .and_then(|bucket| bucket.log)
            .ok_or_else(|| BucketError::Storage {
                key: key.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "bucket does not exist"),
            })
    }
}

impl<'a, C: RecordCodec, S: BucketStorage> Drop for BucketStore<'a, C, S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Streaming reader over the records of a single bucket.
pub struct BucketReader<'a, C: RecordCodec> {
    key: BucketKey,
    reader: Box<dyn BufRead>,
    codec: &'a C,
}

impl<'a, C: RecordCodec> Iterator for BucketReader<'a, C> {
    type Item = Result<Record, StoreError<C>>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.codec.decode(&mut self.reader)?;

        Some(result.map_err(|err| BucketError::Deserialization {
            key: self.key.clone(),
            source: err,
        }))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{BucketKey, BucketStore};
    use crate::codec::{JsonCodec, RmpCodec};
    use crate::record::{Record, SortMode};
    use crate::storage::{MemoryStorage, TempDirStorage};

    #[rstest]
    #[case(BucketKey::new("ab", 2), BucketKey::new("abc", 3))]
    #[case(BucketKey::new("ab", 3), BucketKey::new("abc", 3))]
    #[case(BucketKey::new("ab", 2), BucketKey::new("ab", 3))]
    #[case(BucketKey::new("a", 2), BucketKey::new("b", 2))]
    #[case(BucketKey::new("", 2), BucketKey::new("a", 2))]
    fn test_bucket_key_order(#[case] smaller: BucketKey, #[case] greater: BucketKey) {
        assert!(smaller < greater);
    }

    #[test]
    fn test_bucket_store() {
        let mut storage = MemoryStorage::new();
        {
            let codec = RmpCodec;
            let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);
            let key = BucketKey::new("bo", 2);
            let first = Record::new("bob", "1 Elm");
            let second = Record::new("bo", "2 Oak");

            assert_eq!(store.count_of(&key), 0);
            let log = store.ensure(&key).unwrap();
            assert_eq!(store.ensure(&key).unwrap(), log);

            store.append(&key, &first).unwrap();
            store.append(&key, &second).unwrap();
            store.append(&key, &first).unwrap();

            assert_eq!(store.count_of(&key), 3);
            assert!(store.get(&key).unwrap().is_divisible());
            assert_eq!(store.read_all(&key).unwrap(), vec![first.clone(), second, first]);

            store.remove(&key).unwrap();
            store.remove(&key).unwrap();
            store.remove(&BucketKey::new("zz", 2)).unwrap();
            assert!(store.read_all(&key).is_err());
        }

        assert_eq!(storage.live_logs(), 0);
    }

    #[test]
    fn test_bucket_store_indivisible() {
        let mut storage = MemoryStorage::new();
        let codec = JsonCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByAddress);
        let key = BucketKey::new("ab", 3);

        store.append(&key, &Record::new("x", "ab")).unwrap();
        store.append(&key, &Record::new("y", "ab")).unwrap();

        assert!(!store.get(&key).unwrap().is_divisible());
    }

    #[test]
    fn test_bucket_store_leaves() {
        let mut storage = MemoryStorage::new();
        let codec = RmpCodec;
        let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);

        for name in ["bob", "al", "ann", "alf"] {
            let record = Record::new(name, "");
            store.append(&BucketKey::of(&record, SortMode::ByName, 2), &record).unwrap();
        }
        store.supersede(&BucketKey::new("al", 2));

        assert_eq!(store.len(), 3);
        assert_eq!(store.leaves(), vec![BucketKey::new("an", 2), BucketKey::new("bo", 2)]);
    }

    #[test]
    fn test_bucket_store_release_on_drop() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let mut storage = TempDirStorage::new(Some(tmp_dir.path()), None).unwrap();
        {
            let codec = RmpCodec;
            let mut store = BucketStore::new(&mut storage, &codec, SortMode::ByName);
            for name in ["bob", "al", "ann"] {
                let record = Record::new(name, "");
                store.append(&BucketKey::of(&record, SortMode::ByName, 2), &record).unwrap();
            }
            assert_eq!(store.len(), 3);
        }

        assert_eq!(storage.live_logs(), 0);
        assert_eq!(std::fs::read_dir(storage.path()).unwrap().count(), 0);
    }
}
