//! Bucket log serialization.

use std::error::Error;
use std::io::prelude::*;

use crate::record::Record;

/// Record codec interface. Provides methods for writing records to a bucket log and reading them back.
pub trait RecordCodec {
    type SerializationError: Error;
    type DeserializationError: Error;

    /// Appends the serialized form of `record` to `buf`.
    fn encode(&self, record: &Record, buf: &mut Vec<u8>) -> Result<(), Self::SerializationError>;

    /// Reads the next record from `reader`. Returns [`None`] when the reader is exhausted.
    fn decode(&self, reader: &mut dyn BufRead) -> Option<Result<Record, Self::DeserializationError>>;
}

/// RMP (Rust MessagePack) codec. Used for bucket logs by default.
/// For more information see https://msgpack.org/.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmpCodec;

impl RecordCodec for RmpCodec {
    type SerializationError = rmp_serde::encode::Error;
    type DeserializationError = rmp_serde::decode::Error;

    fn encode(&self, record: &Record, buf: &mut Vec<u8>) -> Result<(), Self::SerializationError> {
        rmp_serde::encode::write(buf, record)
    }

    fn decode(&self, reader: &mut dyn BufRead) -> Option<Result<Record, Self::DeserializationError>> {
        match reader.fill_buf() {
            Ok(buf) if buf.is_empty() => return None,
            Ok(_) => {}
            Err(err) => return Some(Err(rmp_serde::decode::Error::InvalidDataRead(err))),
        }

        Some(rmp_serde::decode::from_read(reader))
    }
}

/// JSON codec, one object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    type SerializationError = serde_json::Error;
    type DeserializationError = serde_json::Error;

    fn encode(&self, record: &Record, buf: &mut Vec<u8>) -> Result<(), Self::SerializationError> {
        serde_json::to_writer(&mut *buf, record)?;
        buf.push(b'\n');

        return Ok(());
    }

    fn decode(&self, reader: &mut dyn BufRead) -> Option<Result<Record, Self::DeserializationError>> {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(serde_json::from_str(line.trim_end_matches(&['\r', '\n'][..]))),
            Err(err) => Some(Err(serde_json::Error::io(err))),
        }
    }
}

/// Decodes every record from `reader` until it is exhausted.
pub fn decode_all<C: RecordCodec>(codec: &C, mut reader: impl BufRead) -> Result<Vec<Record>, C::DeserializationError> {
    let mut records = Vec::new();
    while let Some(record) = codec.decode(&mut reader) {
        records.push(record?);
    }

    return Ok(records);
}

/// Encodes records into a single buffer.
pub fn encode_all<'r, C: RecordCodec>(
    codec: &C,
    records: impl IntoIterator<Item = &'r Record>,
) -> Result<Vec<u8>, C::SerializationError> {
    let mut buf = Vec::new();
    for record in records {
        codec.encode(record, &mut buf)?;
    }

    return Ok(buf);
}
