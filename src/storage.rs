//! Bucket log storage.
//!
//! Every bucket is backed by a named, append-only byte log. Storage implementations pick a unique
//! physical name for each log themselves; the name passed to [`BucketStorage::create`] is only a hint.

use std::collections::HashMap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

/// Default number of bucket files kept open for writing at the same time.
pub const DEFAULT_MAX_OPEN_LOGS: usize = 64;

/// Storage-assigned identifier of a bucket log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogId(u64);

/// Named byte-append-log storage interface.
pub trait BucketStorage {
    /// Creates a new empty log.
    fn create(&mut self, name: &str) -> io::Result<LogId>;

    /// Appends bytes to the end of a log.
    fn append(&mut self, log: LogId, bytes: &[u8]) -> io::Result<()>;

    /// Opens a fresh reader over the whole log content.
    /// Data appended before the call is visible to the reader.
    fn open(&mut self, log: LogId) -> io::Result<Box<dyn BufRead>>;

    /// Deletes a log. Deleting an unknown log is an error of kind [`io::ErrorKind::NotFound`].
    fn delete(&mut self, log: LogId) -> io::Result<()>;
}

fn unknown_log(log: LogId) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("bucket log {} not found", log.0))
}

/// Storage keeping every log as a file in a temporary directory.
/// The directory is removed when the storage is dropped.
pub struct TempDirStorage {
    /// Directory the bucket files are created in.
    dir: tempfile::TempDir,
    /// File read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of simultaneously open writers.
    max_open_logs: usize,

    next_id: u64,
    paths: HashMap<LogId, PathBuf>,
    writers: HashMap<LogId, io::BufWriter<fs::File>>,
}

impl TempDirStorage {
    /// Creates a new storage.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the temporary directory is created in. If the parameter is [`None`] the default OS
    ///   temporary directory is used.
    /// * `rw_buf_size` - Bucket file read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(TempDirStorage {
            dir,
            rw_buf_size,
            max_open_logs: DEFAULT_MAX_OPEN_LOGS,
            next_id: 0,
            paths: HashMap::new(),
            writers: HashMap::new(),
        });
    }

    /// Sets the maximum number of bucket files kept open for writing.
    pub fn with_max_open_logs(mut self, max_open_logs: usize) -> Self {
        self.max_open_logs = max_open_logs.max(1);
        return self;
    }

    /// Returns the temporary directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the number of logs not yet deleted.
    pub fn live_logs(&self) -> usize {
        self.paths.len()
    }

    fn file_prefix(name: &str) -> String {
        let mut prefix: String = name
            .chars()
            .take(16)
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        prefix.push('-');

        return prefix;
    }

    fn writer(&mut self, log: LogId) -> io::Result<&mut io::BufWriter<fs::File>> {
        if !self.writers.contains_key(&log) {
            let path = self.paths.get(&log).ok_or_else(|| unknown_log(log))?;
            let file = fs::OpenOptions::new().append(true).open(path)?;

            if self.writers.len() >= self.max_open_logs {
                self.close_any_writer()?;
            }

            let writer = match self.rw_buf_size {
                Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
                None => io::BufWriter::new(file),
            };
            self.writers.insert(log, writer);
        }

        return self.writers.get_mut(&log).ok_or_else(|| unknown_log(log));
    }

    fn close_any_writer(&mut self) -> io::Result<()> {
        if let Some(log) = self.writers.keys().next().copied() {
            self.close_writer(log)?;
        }

        return Ok(());
    }

    fn close_writer(&mut self, log: LogId) -> io::Result<()> {
        if let Some(mut writer) = self.writers.remove(&log) {
            writer.flush()?;
        }

        return Ok(());
    }
}

impl BucketStorage for TempDirStorage {
    fn create(&mut self, name: &str) -> io::Result<LogId> {
        let tmp_file = tempfile::Builder::new()
            .prefix(&Self::file_prefix(name))
            .suffix(".bucket")
            .tempfile_in(self.dir.path())?;
        let (_, path) = tmp_file.keep()?;

        let log = LogId(self.next_id);
        self.next_id += 1;
        self.paths.insert(log, path);

        log::trace!("bucket log {} created for key '{}'", log.0, name);

        return Ok(log);
    }

    fn append(&mut self, log: LogId, bytes: &[u8]) -> io::Result<()> {
        self.writer(log)?.write_all(bytes)
    }

    fn open(&mut self, log: LogId) -> io::Result<Box<dyn BufRead>> {
        self.close_writer(log)?;

        let path = self.paths.get(&log).ok_or_else(|| unknown_log(log))?;
        let file = fs::File::open(path)?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(Box::new(reader));
    }

    fn delete(&mut self, log: LogId) -> io::Result<()> {
        if let Some(writer) = self.writers.remove(&log) {
            // unflushed data is dropped without being written
            let _ = writer.into_parts();
        }

        let path = self.paths.remove(&log).ok_or_else(|| unknown_log(log))?;
        fs::remove_file(path)
    }
}

/// Storage keeping every log in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    next_id: u64,
    logs: HashMap<LogId, (String, Vec<u8>)>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Returns the number of logs not yet deleted.
    pub fn live_logs(&self) -> usize {
        self.logs.len()
    }

    /// Returns the names of the logs not yet deleted, sorted.
    pub fn log_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.logs.values().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();

        return names;
    }
}

impl BucketStorage for MemoryStorage {
    fn create(&mut self, name: &str) -> io::Result<LogId> {
        let log = LogId(self.next_id);
        self.next_id += 1;
        self.logs.insert(log, (name.to_string(), Vec::new()));

        return Ok(log);
    }

    fn append(&mut self, log: LogId, bytes: &[u8]) -> io::Result<()> {
        let (_, data) = self.logs.get_mut(&log).ok_or_else(|| unknown_log(log))?;
        data.extend_from_slice(bytes);

        return Ok(());
    }

    fn open(&mut self, log: LogId) -> io::Result<Box<dyn BufRead>> {
        let (_, data) = self.logs.get(&log).ok_or_else(|| unknown_log(log))?;

        return Ok(Box::new(io::Cursor::new(data.clone())));
    }

    fn delete(&mut self, log: LogId) -> io::Result<()> {
        self.logs.remove(&log).map(|_| ()).ok_or_else(|| unknown_log(log))
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, prelude::*};

    use rstest::*;

    use super::{BucketStorage, MemoryStorage, TempDirStorage};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn read_to_end(storage: &mut impl BucketStorage, log: super::LogId) -> Vec<u8> {
        let mut content = Vec::new();
        storage.open(log).unwrap().read_to_end(&mut content).unwrap();
        return content;
    }

    #[rstest]
    fn test_temp_dir_storage(tmp_dir: tempfile::TempDir) {
        let mut storage = TempDirStorage::new(Some(tmp_dir.path()), None).unwrap();

        let first = storage.create("ab").unwrap();
        let second = storage.create("ab").unwrap();
        assert_ne!(first, second);

        storage.append(first, b"hello ").unwrap();
        storage.append(second, b"other").unwrap();
        assert_eq!(read_to_end(&mut storage, first), b"hello ");

        // appending after a read must still work
        storage.append(first, b"world").unwrap();
        assert_eq!(read_to_end(&mut storage, first), b"hello world");
        assert_eq!(read_to_end(&mut storage, second), b"other");

        storage.delete(first).unwrap();
        storage.delete(second).unwrap();
        assert_eq!(storage.live_logs(), 0);
        assert_eq!(fs::read_dir(storage.path()).unwrap().count(), 0);

        let err = storage.delete(first).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[rstest]
    fn test_temp_dir_storage_writer_eviction(tmp_dir: tempfile::TempDir) {
        let mut storage = TempDirStorage::new(Some(tmp_dir.path()), Some(16))
            .unwrap()
            .with_max_open_logs(1);

        let logs: Vec<_> = ["a/b", "c d", "é"].iter().map(|name| storage.create(name).unwrap()).collect();
        for round in 0..3 {
            for (idx, log) in logs.iter().enumerate() {
                storage.append(*log, format!("{}{};", idx, round).as_bytes()).unwrap();
            }
        }

        assert_eq!(read_to_end(&mut storage, logs[0]), b"00;01;02;");
        assert_eq!(read_to_end(&mut storage, logs[1]), b"10;11;12;");
        assert_eq!(read_to_end(&mut storage, logs[2]), b"20;21;22;");
    }

    #[rstest]
    fn test_temp_dir_storage_delete_unflushed(tmp_dir: tempfile::TempDir) {
        let mut storage = TempDirStorage::new(Some(tmp_dir.path()), Some(1024)).unwrap();
        let kept = storage.create("ab").unwrap();
        let dropped = storage.create("cd").unwrap();
        storage.append(kept, b"kept").unwrap();
        storage.append(dropped, b"never flushed").unwrap();

        storage.delete(dropped).unwrap();

        assert_eq!(storage.live_logs(), 1);
        assert_eq!(fs::read_dir(storage.path()).unwrap().count(), 1);
        assert!(storage.append(dropped, b"x").is_err());
        assert_eq!(read_to_end(&mut storage, kept), b"kept");
    }

    #[rstest]
    fn test_temp_dir_removed_on_drop(tmp_dir: tempfile::TempDir) {
        let mut storage = TempDirStorage::new(Some(tmp_dir.path()), None).unwrap();
        let log = storage.create("ab").unwrap();
        storage.append(log, b"data").unwrap();

        drop(storage);

        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();

        let log = storage.create("bo").unwrap();
        storage.append(log, b"abc").unwrap();
        storage.append(log, b"def").unwrap();

        assert_eq!(storage.log_names(), vec!["bo"]);
        assert_eq!(read_to_end(&mut storage, log), b"abcdef");

        storage.delete(log).unwrap();
        assert_eq!(storage.live_logs(), 0);
        assert!(storage.delete(log).is_err());
        assert!(storage.append(log, b"x").is_err());
    }
}
