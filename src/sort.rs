//! External bucket sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::bucket::{BucketError, BucketStore};
use crate::codec::{RecordCodec, RmpCodec};
use crate::emit::{EmitError, Emitter, RecordSink};
use crate::partition::Partitioner;
use crate::record::{ConfigError, Record, SortMode};
use crate::storage::{BucketStorage, TempDirStorage, DEFAULT_MAX_OPEN_LOGS};

/// Default maximum number of records per bucket.
pub const DEFAULT_BUFFER_BUDGET: usize = 18;
/// Default bucket key length used for the input stream.
pub const DEFAULT_INITIAL_KEY_LENGTH: usize = 2;

/// Sorting error.
#[derive(Debug)]
pub enum SortError<S: Error, D: Error, I: Error> {
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Bucket storage or bucket record (de)serialization error.
    Bucket(BucketError<S, D>),
    /// Input data stream error.
    InputError(I),
    /// Output sink error.
    OutputError(io::Error),
}

impl<S, D, I> Error for SortError<S, D, I>
where
    S: Error + 'static,
    D: Error + 'static,
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::TempDir(err) => err,
            SortError::Bucket(err) => err,
            SortError::InputError(err) => err,
            SortError::OutputError(err) => err,
        })
    }
}

impl<S: Error, D: Error, I: Error> Display for SortError<S, D, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::Bucket(err) => write!(f, "{}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::OutputError(err) => write!(f, "output data stream error: {}", err),
        }
    }
}

impl<S: Error, D: Error, I: Error> From<BucketError<S, D>> for SortError<S, D, I> {
    fn from(err: BucketError<S, D>) -> Self {
        SortError::Bucket(err)
    }
}

impl<S: Error, D: Error, I: Error> From<EmitError<S, D>> for SortError<S, D, I> {
    fn from(err: EmitError<S, D>) -> Self {
        match err {
            EmitError::Bucket(err) => SortError::Bucket(err),
            EmitError::Output(err) => SortError::OutputError(err),
        }
    }
}

type RunError<C, E> =
    SortError<<C as RecordCodec>::SerializationError, <C as RecordCodec>::DeserializationError, E>;

/// Sort run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of sorted records.
    pub records: usize,
    /// Number of buckets created.
    pub buckets: usize,
    /// Number of emitted buckets.
    pub leaves: usize,
    /// Number of re-partitioned buckets.
    pub splits: usize,
    /// Longest bucket key length used.
    pub max_key_length: usize,
    /// Number of emitted buckets exceeding the budget because they could not be divided.
    pub oversized_leaves: usize,
    /// Number of bucket logs that could not be deleted.
    pub cleanup_failures: usize,
}

/// Bucket sorter builder. Provides methods for [`BucketSorter`] initialization.
#[derive(Clone)]
pub struct BucketSorterBuilder<C = RmpCodec>
where
    C: RecordCodec + Default,
{
    /// Field to sort by.
    sort_mode: Option<SortMode>,
    /// Maximum number of records per bucket.
    buffer_budget: usize,
    /// Bucket key length used for the input stream.
    initial_key_length: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Bucket file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of bucket files open for writing.
    max_open_logs: usize,

    /// Bucket codec type.
    codec_type: PhantomData<C>,
}

impl<C> BucketSorterBuilder<C>
where
    C: RecordCodec + Default,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        BucketSorterBuilder::default()
    }

    /// Builds a [`BucketSorter`] instance using provided configuration.
    pub fn build(self) -> Result<BucketSorter<C>, ConfigError> {
        let mode = self.sort_mode.ok_or(ConfigError::NoSortMode)?;
        if self.buffer_budget == 0 {
            return Err(ConfigError::ZeroBufferBudget);
        }
        if self.initial_key_length == 0 {
            return Err(ConfigError::ZeroKeyLength);
        }

        return Ok(BucketSorter {
            mode,
            buffer_budget: self.buffer_budget,
            initial_key_length: self.initial_key_length,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            max_open_logs: self.max_open_logs,
            codec: C::default(),
        });
    }

    /// Sets the field to sort by.
    pub fn with_sort_mode(mut self, mode: SortMode) -> BucketSorterBuilder<C> {
        self.sort_mode = Some(mode);
        return self;
    }

    /// Sets the maximum number of records a bucket may hold before it is split further.
    pub fn with_buffer_budget(mut self, buffer_budget: usize) -> BucketSorterBuilder<C> {
        self.buffer_budget = buffer_budget;
        return self;
    }

    /// Sets the bucket key length used for the input stream.
    pub fn with_initial_key_length(mut self, key_length: usize) -> BucketSorterBuilder<C> {
        self.initial_key_length = key_length;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> BucketSorterBuilder<C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets bucket file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> BucketSorterBuilder<C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets the maximum number of bucket files kept open for writing.
    pub fn with_max_open_logs(mut self, max_open_logs: usize) -> BucketSorterBuilder<C> {
        self.max_open_logs = max_open_logs;
        return self;
    }
}

impl<C> Default for BucketSorterBuilder<C>
where
    C: RecordCodec + Default,
{
    fn default() -> Self {
        BucketSorterBuilder {
            sort_mode: None,
            buffer_budget: DEFAULT_BUFFER_BUDGET,
            initial_key_length: DEFAULT_INITIAL_KEY_LENGTH,
            tmp_dir: None,
            rw_buf_size: None,
            max_open_logs: DEFAULT_MAX_OPEN_LOGS,
            codec_type: PhantomData,
        }
    }
}

/// External bucket sorter.
pub struct BucketSorter<C = RmpCodec>
where
    C: RecordCodec,
{
    /// Field to sort by.
    mode: SortMode,
    /// Maximum number of records per bucket.
    buffer_budget: usize,
    /// Bucket key length used for the input stream.
    initial_key_length: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Bucket file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of bucket files open for writing.
    max_open_logs: usize,
    /// Bucket log codec.
    codec: C,
}

impl<C> BucketSorter<C>
where
    C: RecordCodec,
{
    pub fn mode(&self) -> SortMode {
        self.mode
    }

    pub fn buffer_budget(&self) -> usize {
        self.buffer_budget
    }

    /// Sorts records from the input writing them to the sink, using a fresh temporary directory for buckets.
    ///
    /// # Arguments
    /// * `input` - Input stream records to be fetched from
    /// * `sink` - Sorted records consumer
    pub fn sort<I, E, K>(
        &self,
        input: I,
        sink: &mut K,
    ) -> Result<SortSummary, RunError<C, E>>
    where
        I: IntoIterator<Item = Result<Record, E>>,
        E: Error,
        K: RecordSink + ?Sized,
    {
        let mut storage = TempDirStorage::new(self.tmp_dir.as_deref(), self.rw_buf_size)
            .map_err(RunError::<C, E>::TempDir)?
            .with_max_open_logs(self.max_open_logs);

        self.sort_in(&mut storage, input, sink)
    }

    /// Sorts records from the input writing them to the sink, keeping buckets in the provided storage.
    ///
    /// Every bucket log created during the run is deleted before the method returns, whether the run
    /// succeeded or not. Records written to the sink before a failure are not rolled back.
    pub fn sort_in<S, I, E, K>(
        &self,
        storage: &mut S,
        input: I,
        sink: &mut K,
    ) -> Result<SortSummary, RunError<C, E>>
    where
        S: BucketStorage,
        I: IntoIterator<Item = Result<Record, E>>,
        E: Error,
        K: RecordSink + ?Sized,
    {
        log::info!(
            "sorting by {} (buffer budget: {}, key length: {})",
            self.mode,
            self.buffer_budget,
            self.initial_key_length
        );

        let mut store = BucketStore::new(storage, &self.codec, self.mode);

        let partitioner = Partitioner::new(self.buffer_budget, self.initial_key_length);
        let input = input.into_iter().map(|item| item.map_err(RunError::<C, E>::InputError));
        let partitioned = partitioner.partition(&mut store, input)?;
        log::debug!("partitioning done ({} buckets)", store.len());

        let emitted = Emitter::new(self.buffer_budget).emit(&mut store, sink)?;

        let buckets = store.len();
        let cleanup_failures = store.release();
        if cleanup_failures > 0 {
            log::warn!("{} bucket logs could not be deleted", cleanup_failures);
        }

        let summary = SortSummary {
            records: emitted.records,
            buckets,
            leaves: emitted.buckets,
            splits: partitioned.splits,
            max_key_length: partitioned.max_key_len,
            oversized_leaves: partitioned.oversized,
            cleanup_failures,
        };
        log::info!(
            "{} records sorted ({} buckets, {} emitted, key length up to {})",
            summary.records,
            summary.buckets,
            summary.leaves,
            summary.max_key_length
        );

        return Ok(summary);
    }
}
