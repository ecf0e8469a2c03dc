//! `bucket-sort` is an external bucketing sort for streams of name/address records.
//!
//! The records to be sorted may not fit into memory. Instead of sorting chunks and merging them, the sorter
//! partitions the input stream into buckets keyed by a prefix of the sort field, stored on disk. Any bucket
//! holding more records than the buffer budget is partitioned again using a prefix one character longer.
//! Once the input is exhausted the buckets are sorted in memory one by one and emitted in key order, which
//! produces a totally ordered output: keys are prefixes of their records' fields, so a bucket with a smaller
//! key never holds a record greater than any record of a bucket with a greater key.
//!
//! # Overview
//!
//! `bucket-sort` supports the following features:
//!
//! * **Bounded memory:**
//!   at most one bucket (limited by the buffer budget) is held in memory at a time. A bucket all of whose
//!   records share the same sort field can't be divided and is streamed instead.
//! * **Stable ordering:**
//!   records with equal sort fields are emitted in their input order.
//! * **Serialization format agnostic:**
//!   bucket logs use `MessagePack` by default, any [`RecordCodec`] implementation can be plugged in.
//! * **Storage agnostic:**
//!   buckets are kept in a temporary directory by default, any [`BucketStorage`] implementation can be used.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use bucket_sort::{BucketSorter, BucketSorterBuilder, JsonLinesReader, JsonLinesWriter, SortMode};
//!
//! fn main() {
//!     let input_reader = JsonLinesReader::new(io::BufReader::new(fs::File::open("input.jsonl").unwrap()));
//!     let mut output_writer = JsonLinesWriter::new(io::BufWriter::new(fs::File::create("output.jsonl").unwrap()));
//!
//!     let sorter: BucketSorter = BucketSorterBuilder::new()
//!         .with_sort_mode(SortMode::ByName)
//!         .with_buffer_budget(100_000)
//!         .with_tmp_dir(path::Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort(input_reader, &mut output_writer).unwrap();
//!     output_writer.finish().unwrap();
//! }
//! ```

pub mod bucket;
pub mod codec;
pub mod emit;
pub mod jsonl;
pub mod partition;
pub mod record;
pub mod sort;
pub mod storage;

pub use bucket::{BucketError, BucketKey, BucketStore};
pub use codec::{JsonCodec, RecordCodec, RmpCodec};
pub use emit::RecordSink;
pub use jsonl::{DecodeError, JsonLinesReader, JsonLinesWriter};
pub use record::{bucket_key, ConfigError, Record, SortMode};
pub use sort::{BucketSorter, BucketSorterBuilder, SortError, SortSummary};
pub use storage::{BucketStorage, MemoryStorage, TempDirStorage};
