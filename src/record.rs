//! Records, sort modes and bucket key derivation.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// A single name/address record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub name: String,
    pub address: String,
}

impl Record {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Record {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Configuration error. Raised before any storage side effect takes place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Neither sort field was selected.
    NoSortMode,
    /// Both sort fields were selected.
    ConflictingSortModes,
    /// Buffer budget must allow at least one record per bucket.
    ZeroBufferBudget,
    /// Initial bucket key length must be at least one character.
    ZeroKeyLength,
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoSortMode => write!(f, "no sort field selected, choose either name or address"),
            ConfigError::ConflictingSortModes => write!(f, "cannot sort by both name and address, choose one"),
            ConfigError::ZeroBufferBudget => write!(f, "buffer budget must be a positive number of records"),
            ConfigError::ZeroKeyLength => write!(f, "initial key length must be at least 1"),
        }
    }
}

/// Field records are sorted and bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    ByName,
    ByAddress,
}

impl SortMode {
    /// Translates a pair of `by name` / `by address` switches into a sort mode.
    /// Exactly one of them must be set.
    pub fn from_flags(by_name: bool, by_address: bool) -> Result<Self, ConfigError> {
        match (by_name, by_address) {
            (true, false) => Ok(SortMode::ByName),
            (false, true) => Ok(SortMode::ByAddress),
            (true, true) => Err(ConfigError::ConflictingSortModes),
            (false, false) => Err(ConfigError::NoSortMode),
        }
    }

    /// Returns the field of `record` selected by this mode.
    pub fn field<'r>(&self, record: &'r Record) -> &'r str {
        match self {
            SortMode::ByName => &record.name,
            SortMode::ByAddress => &record.address,
        }
    }

    /// Compares two records by the selected field (byte-wise).
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.field(a).cmp(self.field(b))
    }

    /// Sorts records in memory. The sort is stable: records with equal fields keep their relative order.
    pub fn sort(&self, records: &mut [Record]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

impl Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortMode::ByName => write!(f, "name"),
            SortMode::ByAddress => write!(f, "address"),
        }
    }
}

/// Returns the bucket key of `record`: the first `key_len` characters of the selected field,
/// or the whole field if it is shorter.
///
/// The key is always a byte prefix of the field, a multi-byte character is never split.
pub fn bucket_key<'r>(record: &'r Record, mode: SortMode, key_len: usize) -> &'r str {
    let field = mode.field(record);
    match field.char_indices().nth(key_len) {
        Some((idx, _)) => &field[..idx],
        None => field,
    }
}
