//! Append-only segment files.
//!
//! A segment is one file of the WAL, named `NNNNNNNNNN.wal` after the
//! sequence number of its first record. The active segment accepts appends
//! until a rotation trigger fires (size or age); rotated segments are
//! immutable.
//!
//! Durability contract: [`Segment::append`] leaves bytes in the OS page
//! cache; nothing is durable until [`Segment::sync`] returns. Sync uses
//! `sync_all` so file-size metadata survives a crash along with the data.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::error::{Result, WalError};
use crate::record::{self, CodecError, Record};

/// File extension for segment files.
pub const SEGMENT_EXT: &str = "wal";

/// File extension for sidecar index files.
pub const INDEX_EXT: &str = "idx";

/// Formats a segment file name from its first sequence number.
pub fn segment_file_name(first_sequence: u64) -> String {
    format!("{first_sequence:010}.{SEGMENT_EXT}")
}

/// Parses a segment file name back to its first sequence number.
///
/// Returns `None` for files that are not segments.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(&format!(".{SEGMENT_EXT}"))?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// State of the byte tail after scanning a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailState {
    /// EOF fell exactly on a record boundary.
    Clean,
    /// Trailing partial record from a torn write. Acceptable only on the
    /// last segment of a WAL; repaired by truncating at `offset`.
    Torn { offset: u64 },
    /// Bytes at `offset` decode to garbage (CRC, magic, or version failure).
    /// Never acceptable without explicit repair.
    Corrupt { offset: u64, reason: String },
}

impl TailState {
    pub fn is_clean(&self) -> bool {
        matches!(self, TailState::Clean)
    }
}

/// Streaming record iterator over a segment's bytes.
///
/// Yields records until the first undecodable bytes, then reports the tail
/// state. The distinction matters: a [`TailState::Torn`] tail is the
/// signature of a crash mid-append and is recoverable; [`TailState::Corrupt`]
/// means written bytes changed underneath us.
#[derive(Debug)]
pub struct SegmentIter {
    data: Bytes,
    pos: usize,
    tail: TailState,
    done: bool,
}

impl SegmentIter {
    /// Iterates records in `data` starting at byte `from_offset`.
    pub fn new(data: Bytes, from_offset: u64) -> Self {
        Self {
            data,
            pos: from_offset as usize,
            tail: TailState::Clean,
            done: false,
        }
    }

    /// Reads the segment at `path` and iterates from byte 0.
    pub fn open(path: &Path) -> Result<Self> {
        let data: Bytes = std::fs::read(path)?.into();
        Ok(Self::new(data, 0))
    }

    /// Tail state; meaningful once the iterator has been exhausted.
    pub fn tail_state(&self) -> &TailState {
        &self.tail
    }

    /// Byte length of the valid prefix consumed so far.
    pub fn valid_len(&self) -> u64 {
        self.pos as u64
    }
}

impl Iterator for SegmentIter {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.done || self.pos >= self.data.len() {
            self.done = true;
            return None;
        }

        match record::decode(&self.data.slice(self.pos..)) {
            Ok((record, consumed)) => {
                self.pos += consumed;
                Some(record)
            }
            Err(err) => {
                self.done = true;
                self.tail = match err {
                    CodecError::Truncated { .. } => TailState::Torn {
                        offset: self.pos as u64,
                    },
                    other => TailState::Corrupt {
                        offset: self.pos as u64,
                        reason: other.to_string(),
                    },
                };
                None
            }
        }
    }
}

/// Full scan result of one segment.
#[derive(Debug)]
pub struct SegmentScan {
    pub records: Vec<Record>,
    pub tail: TailState,
    /// Byte length of the decodable prefix. Truncating the file to this
    /// length removes exactly the invalid tail.
    pub valid_len: u64,
}

impl SegmentScan {
    /// Decodes every record in the segment at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let mut iter = SegmentIter::open(path)?;
        let records: Vec<Record> = iter.by_ref().collect();
        Ok(Self {
            tail: iter.tail_state().clone(),
            valid_len: iter.valid_len(),
            records,
        })
    }
}

/// The writable end of the active segment.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    file: File,
    first_sequence: u64,
    len: u64,
    max_bytes: u64,
    created_at: SystemTime,
}

fn open_segment_file(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true).read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    Ok(opts.open(path)?)
}

impl Segment {
    /// Creates a fresh segment in `dir` for records starting at
    /// `first_sequence`.
    pub fn create(dir: &Path, first_sequence: u64, max_bytes: u64) -> Result<Self> {
        let path = dir.join(segment_file_name(first_sequence));
        let file = open_segment_file(&path)?;
        Ok(Self {
            path,
            file,
            first_sequence,
            len: 0,
            max_bytes,
            created_at: SystemTime::now(),
        })
    }

    /// Reopens an existing segment for appending, typically after recovery
    /// has validated (and possibly truncated) its contents.
    pub fn open(path: PathBuf, first_sequence: u64, max_bytes: u64) -> Result<Self> {
        let file = open_segment_file(&path)?;
        let meta = file.metadata()?;
        let created_at = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(Self {
            len: meta.len(),
            path,
            file,
            first_sequence,
            max_bytes,
            created_at,
        })
    }

    /// Appends encoded record bytes, returning the byte offset they begin at.
    ///
    /// Fails with [`WalError::SegmentFull`] when the record would push the
    /// segment past its size limit; the caller rotates and retries. Appended
    /// bytes are not durable until [`Segment::sync`] returns.
    pub fn append(&mut self, record_bytes: &[u8]) -> Result<u64> {
        let record_len = record_bytes.len() as u64;
        if self.len + record_len > self.max_bytes {
            return Err(WalError::SegmentFull {
                record_len,
                remaining: self.max_bytes.saturating_sub(self.len),
            });
        }

        let offset = self.len;
        self.file.write_all(record_bytes)?;
        self.len += record_len;
        Ok(offset)
    }

    /// Blocks until all appended bytes (and file metadata) reach stable
    /// storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current segment size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sequence number of the first record this segment holds.
    pub fn first_sequence(&self) -> u64 {
        self.first_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time since this segment was created (or first observed).
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }

    /// True when a rotation trigger has fired for this segment.
    pub fn wants_rotation(&self, incoming_len: u64, max_age: Duration) -> bool {
        if self.len == 0 {
            // Never rotate an empty segment; the incoming record gets a
            // fresh size check in `append` instead.
            return false;
        }
        self.len + incoming_len > self.max_bytes || self.age() >= max_age
    }
}
