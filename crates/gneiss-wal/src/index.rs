//! Sparse sidecar index for segment files.
//!
//! Maps record sequence numbers to byte offsets so range reads can seek into
//! a segment without decoding from byte 0. The index is a pure optimization:
//! it is written when a segment rotates, ignored by integrity verification,
//! and rebuilt from the segment whenever it is missing or damaged.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Description                 │
//! ├──────────────────────────────────────────────────┤
//! │  0       │  4     │  Magic bytes: "GIDX"         │
//! │  4       │  1     │  Version: 0x01               │
//! │  5       │  3     │  Reserved (zero padding)     │
//! │  8       │  8     │  First sequence (u64 LE)     │
//! │  16      │  8     │  Entry count (u64 LE)        │
//! │  24      │  8*N   │  Byte offsets [u64 LE; N]    │
//! │  24+8*N  │  4     │  CRC-32C of bytes 0..24+8*N  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Entry `i` is the byte offset of the record with sequence
//! `first_sequence + i`.

use std::fs;
use std::path::Path;

use crate::error::{Result, WalError};
use crate::segment::SegmentIter;

const MAGIC: &[u8; 4] = b"GIDX";
const VERSION: u8 = 0x01;
const HEADER_LEN: usize = 24;

/// Sequence → byte-offset index for one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentIndex {
    first_sequence: u64,
    offsets: Vec<u64>,
}

impl SegmentIndex {
    /// Creates an empty index for a segment starting at `first_sequence`.
    pub fn new(first_sequence: u64) -> Self {
        Self {
            first_sequence,
            offsets: Vec::new(),
        }
    }

    /// Records the byte offset of the next record.
    pub fn push(&mut self, byte_offset: u64) {
        debug_assert!(
            self.offsets.last().is_none_or(|&last| byte_offset > last),
            "offsets must be strictly increasing"
        );
        self.offsets.push(byte_offset);
    }

    /// Byte offset of the record with the given sequence, if indexed.
    pub fn lookup(&self, sequence: u64) -> Option<u64> {
        let idx = sequence.checked_sub(self.first_sequence)? as usize;
        self.offsets.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn first_sequence(&self) -> u64 {
        self.first_sequence
    }

    /// Persists the index to `path` (write-then-rename is unnecessary: the
    /// index is rebuildable, so a torn index file only costs a rebuild).
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.offsets.len() * 8 + 4);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.first_sequence.to_le_bytes());
        buf.extend_from_slice(&(self.offsets.len() as u64).to_le_bytes());
        for offset in &self.offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        fs::write(path, buf)?;
        Ok(())
    }

    /// Loads an index from `path`, failing on any structural damage.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let fail = |reason: &str| WalError::Integrity {
            segment: path.display().to_string(),
            reason: format!("index: {reason}"),
        };

        if data.len() < HEADER_LEN + 4 {
            return Err(fail("file too short"));
        }
        if &data[0..4] != MAGIC {
            return Err(fail("bad magic"));
        }
        if data[4] != VERSION {
            return Err(fail("unsupported version"));
        }

        let first_sequence = u64::from_le_bytes(data[8..16].try_into().expect("8 bytes"));
        let count = u64::from_le_bytes(data[16..24].try_into().expect("8 bytes")) as usize;
        let expected_len = HEADER_LEN + count * 8 + 4;
        if data.len() != expected_len {
            return Err(fail("length does not match entry count"));
        }

        let crc_offset = expected_len - 4;
        let stored = u32::from_le_bytes(data[crc_offset..].try_into().expect("4 bytes"));
        if stored != crc32c::crc32c(&data[..crc_offset]) {
            return Err(fail("crc mismatch"));
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let start = HEADER_LEN + i * 8;
            offsets.push(u64::from_le_bytes(
                data[start..start + 8].try_into().expect("8 bytes"),
            ));
        }

        Ok(Self {
            first_sequence,
            offsets,
        })
    }

    /// Rebuilds the index by scanning the segment file itself.
    pub fn rebuild(segment_path: &Path, first_sequence: u64) -> Result<Self> {
        let mut index = Self::new(first_sequence);
        let mut iter = SegmentIter::open(segment_path)?;
        let mut offset = 0u64;
        for record in iter.by_ref() {
            index.push(offset);
            offset += record.encoded_len() as u64;
        }
        Ok(index)
    }

    /// Loads the sidecar for `segment_path`, rebuilding it on any failure.
    pub fn load_or_rebuild(
        segment_path: &Path,
        index_path: &Path,
        first_sequence: u64,
    ) -> Result<Self> {
        match Self::load(index_path) {
            Ok(index) if index.first_sequence == first_sequence => Ok(index),
            Ok(_) | Err(_) => {
                tracing::debug!(
                    segment = %segment_path.display(),
                    "sidecar index missing or stale, rebuilding from segment"
                );
                Self::rebuild(segment_path, first_sequence)
            }
        }
    }
}
