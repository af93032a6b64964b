//! # gneiss-wal: Segmented, hash-chained write-ahead log
//!
//! The durability core of the Gneiss audit sink. An append-only log split
//! into rotating segment files, where every record carries a CRC-32C seal
//! and a SHA-256 link to its predecessor, so both bit rot and deliberate
//! tampering are detectable.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Wal                               │
//! │  ┌──────────┐   ┌───────────┐   ┌─────────────────────────┐  │
//! │  │  record  │ → │  segment  │ → │ 0000000001.wal (+ .idx) │  │
//! │  │  codec   │   │  (active) │   │ 0000000474.wal …        │  │
//! │  └──────────┘   └───────────┘   └─────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!        ↑ GroupCommitter / OptimizedGroupCommitter batch the fsync
//! ```
//!
//! Once an append has been flushed, the record survives process crashes,
//! power loss, and torn writes; recovery truncates at most the trailing
//! partial record.

mod committer;
mod dirlock;
mod error;
mod index;
mod record;
mod ring;
mod segment;
mod wal;

pub use committer::{
    CommitterConfig, CommitterStats, CommitterStatsSnapshot, GroupCommitter, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_DELAY,
};
pub use dirlock::{DirLock, LOCK_FILE_NAME};
pub use error::{Result, WalError};
pub use index::SegmentIndex;
pub use record::{
    decode, encode, CodecError, Record, RecordFlags, FORMAT_VERSION, HEADER_LEN, MAGIC,
    RECORD_OVERHEAD,
};
pub use ring::{OptimizedGroupCommitter, RingConfig, DEFAULT_RING_CAPACITY};
pub use segment::{
    parse_segment_file_name, segment_file_name, Segment, SegmentIter, SegmentScan, TailState,
};
pub use wal::{
    IntegrityReport, RecoveryInfo, Wal, WalOptions, DEFAULT_MAX_SEGMENT_AGE,
    DEFAULT_MAX_SEGMENT_BYTES,
};
