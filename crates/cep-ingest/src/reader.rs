//! Streaming record reader
//!
//! Converts an object's line stream into chunks of parsed records with exact
//! byte-range tracking. The sequence of chunks is lazy, finite, and
//! non-restartable; memory is bounded by `chunk_size` records.
//!
//! Byte accounting rules:
//! - every line advances the running offset by its raw length, newline
//!   included — blank and malformed lines too
//! - a chunk's range spans the first record's line start to the last
//!   record's final byte (inclusive)
//!
//! Re-fetching exactly that range through
//! [`ObjectStore::stream_line_range`](crate::storage::ObjectStore) and
//! feeding it to [`parse_line_range`] with the same headers reproduces the
//! chunk's records without rescanning the file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{LineStream, StorageError};

/// One parsed data row.
///
/// `row_number` counts parseable data rows from 1, header excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRow {
    pub row_number: i64,
    pub fields: HashMap<String, String>,
}

impl ParsedRow {
    /// Trimmed, non-blank value of a field. `None` when the column is absent
    /// or holds only whitespace.
    pub fn value(&self, field: &str) -> Option<&str> {
        let v = self.fields.get(field)?.trim();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }

    /// Raw value of a field, if the column exists
    pub fn raw(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|s| s.as_str())
    }
}

/// One chunk of records and the exact byte span they came from
#[derive(Debug, Clone)]
pub struct RecordChunk {
    /// Sequential, 1-based
    pub chunk_number: i32,
    pub headers: Vec<String>,
    pub records: Vec<ParsedRow>,
    /// Offset of the first record's line start
    pub start_byte: u64,
    /// Offset of the last record's final byte, inclusive
    pub end_byte: u64,
}

impl RecordChunk {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Chunked reader over an object's line stream
pub struct ChunkReader {
    lines: Box<dyn LineStream>,
    chunk_size: usize,
    offset: u64,
    line_number: u64,
    headers: Option<Vec<String>>,
    next_chunk_number: i32,
    next_row_number: i64,
    exhausted: bool,
}

impl ChunkReader {
    pub fn new(lines: Box<dyn LineStream>, chunk_size: usize) -> Self {
        Self {
            lines,
            chunk_size: chunk_size.max(1),
            offset: 0,
            line_number: 0,
            headers: None,
            next_chunk_number: 1,
            next_row_number: 1,
            exhausted: false,
        }
    }

    /// Headers, once the first non-blank line has been read
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Next chunk, or `None` once the input is exhausted.
    ///
    /// A final partial chunk is still emitted; an empty or header-only
    /// object yields nothing.
    pub async fn next_chunk(&mut self) -> Result<Option<RecordChunk>, StorageError> {
        if self.exhausted {
            return Ok(None);
        }

        if self.headers.is_none() && !self.read_headers().await? {
            return Ok(None);
        }

        let mut records = Vec::new();
        let mut start_byte: Option<u64> = None;
        let mut end_byte = 0u64;

        loop {
            let raw = match self.lines.next_line().await? {
                Some(raw) => raw,
                None => {
                    self.exhausted = true;
                    break;
                },
            };

            let line_start = self.offset;
            self.offset += raw.byte_len;
            self.line_number += 1;

            if raw.text.trim().is_empty() {
                continue;
            }

            let headers = self.headers.as_deref().unwrap_or_default();
            match parse_row_fields(headers, &raw.text) {
                Some(fields) => {
                    if start_byte.is_none() {
                        start_byte = Some(line_start);
                    }
                    end_byte = line_start + raw.byte_len - 1;
                    records.push(ParsedRow {
                        row_number: self.next_row_number,
                        fields,
                    });
                    self.next_row_number += 1;

                    if records.len() >= self.chunk_size {
                        break;
                    }
                },
                None => {
                    warn!(
                        line_number = self.line_number,
                        "Dropping malformed line; bytes still counted"
                    );
                },
            }
        }

        let start_byte = match start_byte {
            Some(b) => b,
            None => return Ok(None),
        };

        let chunk = RecordChunk {
            chunk_number: self.next_chunk_number,
            headers: self.headers.clone().unwrap_or_default(),
            records,
            start_byte,
            end_byte,
        };
        self.next_chunk_number += 1;

        debug!(
            chunk_number = chunk.chunk_number,
            records = chunk.records.len(),
            start_byte = chunk.start_byte,
            end_byte = chunk.end_byte,
            "Chunk assembled"
        );

        Ok(Some(chunk))
    }

    /// Consume lines until the first non-blank one becomes the headers.
    /// Returns false when the stream ends first.
    async fn read_headers(&mut self) -> Result<bool, StorageError> {
        loop {
            let raw = match self.lines.next_line().await? {
                Some(raw) => raw,
                None => {
                    self.exhausted = true;
                    return Ok(false);
                },
            };

            self.offset += raw.byte_len;
            self.line_number += 1;

            if raw.text.trim().is_empty() {
                continue;
            }

            match parse_csv_fields(&raw.text) {
                Some(fields) => {
                    self.headers = Some(fields.iter().map(|h| h.trim().to_string()).collect());
                    return Ok(true);
                },
                None => {
                    warn!(
                        line_number = self.line_number,
                        "Dropping malformed header candidate"
                    );
                },
            }
        }
    }
}

/// Re-parse a previously emitted byte span.
///
/// `lines` should stream exactly the `start_byte..=end_byte` range of the
/// original object; `headers` must be the headers the chunk was emitted
/// with. Row numbers are assigned sequentially from `first_row_number`.
pub async fn parse_line_range(
    mut lines: Box<dyn LineStream>,
    headers: &[String],
    first_row_number: i64,
) -> Result<Vec<ParsedRow>, StorageError> {
    let mut records = Vec::new();
    let mut row_number = first_row_number;
    let mut line_number = 0u64;

    while let Some(raw) = lines.next_line().await? {
        line_number += 1;

        if raw.text.trim().is_empty() {
            continue;
        }

        match parse_row_fields(headers, &raw.text) {
            Some(fields) => {
                records.push(ParsedRow { row_number, fields });
                row_number += 1;
            },
            None => {
                warn!(line_number, "Dropping malformed line in range re-read");
            },
        }
    }

    Ok(records)
}

/// Parse one delimited line into raw fields. `None` on a CSV parse failure.
fn parse_csv_fields(line: &str) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(|f| f.to_string()).collect()),
        _ => None,
    }
}

/// Parse one data line against the headers. `None` when the line cannot be
/// parsed or every field is empty.
fn parse_row_fields(headers: &[String], line: &str) -> Option<HashMap<String, String>> {
    let fields = parse_csv_fields(line)?;

    if fields.iter().all(|f| f.trim().is_empty()) {
        return None;
    }

    Some(
        headers
            .iter()
            .zip(fields)
            .map(|(h, f)| (h.clone(), f))
            .collect(),
    )
}
