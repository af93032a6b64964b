//! WAL error types.

use std::path::PathBuf;

use crate::record::CodecError;

/// Errors from the WAL engine and group committers.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// Underlying OS I/O error on a segment or directory.
    #[error("segment I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The active segment cannot hold the record; rotation is required.
    #[error("segment full: record needs {record_len} bytes, {remaining} remain")]
    SegmentFull { record_len: u64, remaining: u64 },

    /// The WAL directory is already open in this process.
    #[error("WAL directory already locked: {path}")]
    AlreadyLocked { path: PathBuf },

    /// A scan found corruption that recovery was not allowed to repair.
    #[error("integrity failure in segment {segment}: {reason}")]
    Integrity { segment: String, reason: String },

    /// A record failed to decode while scanning a segment.
    #[error("codec failure in segment {segment}: {source}")]
    Codec {
        segment: String,
        #[source]
        source: CodecError,
    },

    /// A file in the WAL directory does not follow segment naming.
    #[error("invalid segment file name: {name}")]
    InvalidSegmentName { name: String },

    /// The committer (or WAL) has been closed; no further writes accepted.
    #[error("write-ahead log is closed")]
    Closed,

    /// The lock-free committer's ring is saturated.
    #[error("commit ring full: capacity {capacity}")]
    BufferFull { capacity: usize },

    /// A group-commit flush failed; every waiter in the batch sees this.
    #[error("group commit failed: {message}")]
    CommitFailed { message: String },
}

pub type Result<T> = std::result::Result<T, WalError>;
