//! JSON lines input and output.
//!
//! Each line holds a single record object: `{"name": "...", "address": "..."}`.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};

use crate::emit::RecordSink;
use crate::record::Record;

/// Input line decoding error.
#[derive(Debug)]
pub enum DecodeError {
    /// Input stream read error.
    IO { line: usize, source: io::Error },
    /// Malformed record.
    Json { line: usize, source: serde_json::Error },
}

impl DecodeError {
    /// Returns the 1-based number of the line the error occurred on.
    pub fn line(&self) -> usize {
        match self {
            DecodeError::IO { line, .. } => *line,
            DecodeError::Json { line, .. } => *line,
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match self {
            DecodeError::IO { source, .. } => source,
            DecodeError::Json { source, .. } => source,
        })
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::IO { line, source } => write!(f, "line {} read error: {}", line, source),
            DecodeError::Json { line, source } => write!(f, "line {} malformed record: {}", line, source),
        }
    }
}

/// Iterator over the records of a JSON lines stream. Blank lines are ignored.
pub struct JsonLinesReader<R: BufRead> {
    reader: R,
    line: usize,
    skip_malformed: bool,
    skipped: usize,
    done: bool,
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn new(reader: R) -> Self {
        JsonLinesReader {
            reader,
            line: 0,
            skip_malformed: false,
            skipped: 0,
            done: false,
        }
    }

    /// Makes the reader log and skip malformed lines instead of yielding an error.
    pub fn skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        return self;
    }

    /// Returns the number of skipped malformed lines.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = String::new();

        while !self.done {
            buf.clear();
            self.line += 1;

            match self.reader.read_line(&mut buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let content = buf.trim();
                    if content.is_empty() {
                        continue;
                    }

                    match serde_json::from_str(content) {
                        Ok(record) => return Some(Ok(record)),
                        Err(err) if self.skip_malformed => {
                            log::warn!("skipping line {}: {}", self.line, err);
                            self.skipped += 1;
                        }
                        Err(err) => {
                            return Some(Err(DecodeError::Json {
                                line: self.line,
                                source: err,
                            }))
                        }
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(DecodeError::IO {
                        line: self.line,
                        source: err,
                    }));
                }
            }
        }

        None
    }
}

/// Record sink writing one JSON object per line.
pub struct JsonLinesWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesWriter { writer, written: 0 }
    }

    /// Returns the number of written records.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the underlying writer and returns it.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        return Ok(self.writer);
    }
}

impl<W: Write> RecordSink for JsonLinesWriter<W> {
    fn put(&mut self, record: Record) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;

        return Ok(());
    }
}
