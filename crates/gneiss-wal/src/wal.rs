//! The WAL engine: a directory of hash-chained segments.
//!
//! # File Layout
//!
//! ```text
//! {wal_dir}/
//! ├── 0000000001.wal   <- first segment (immutable after rotation)
//! ├── 0000000001.idx   <- sidecar index (rebuildable)
//! ├── 0000000474.wal   <- active segment, named by its first sequence
//! └── wal.lock         <- ownership marker
//! ```
//!
//! # Recovery
//!
//! Open scans the highest segment to rebuild `next_sequence` and `last_hash`.
//! A torn tail (crash mid-append) is truncated at the last record boundary
//! and reported as a recovery, never an error. Anything else (CRC failure,
//! chain break, sequence gap) fails open with an integrity error unless
//! `repair_on_open` is set, in which case the segment is truncated at the
//! last valid boundary.
//!
//! # Invariants
//!
//! - Sequences are strictly monotonic from 1 with no gaps
//! - `prev_hash` of each record equals `record_hash` of its predecessor;
//!   the chain is continuous across segment boundaries
//! - A record is durable only once its segment has been fsynced

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use gneiss_crypto::{Hash32, ZERO_HASH};
use gneiss_types::{MetricsRecorder, NoopRecorder, SyncMode};

use crate::dirlock::{DirLock, LOCK_FILE_NAME};
use crate::error::{Result, WalError};
use crate::index::SegmentIndex;
use crate::record::{self, Record, RecordFlags};
use crate::segment::{
    parse_segment_file_name, segment_file_name, Segment, SegmentIter, SegmentScan, TailState,
    INDEX_EXT,
};

/// Default maximum segment size before rotation (128 MiB).
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 128 * 1024 * 1024;

/// Default maximum segment age before rotation (24 hours).
pub const DEFAULT_MAX_SEGMENT_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for opening a WAL.
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// When appended bytes reach stable storage.
    pub sync_mode: SyncMode,
    /// Size rotation trigger.
    pub max_segment_bytes: u64,
    /// Age rotation trigger.
    pub max_segment_age: Duration,
    /// Allow open to truncate corrupt bytes at the last valid boundary
    /// instead of failing.
    pub repair_on_open: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Batch,
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            max_segment_age: DEFAULT_MAX_SEGMENT_AGE,
            repair_on_open: false,
        }
    }
}

/// What open found and did while recovering the directory.
#[derive(Debug, Clone, Default)]
pub struct RecoveryInfo {
    /// Segments present in the directory.
    pub segments_found: usize,
    /// Records validated in the scanned (highest) segment.
    pub valid_records: u64,
    /// Bytes truncated from the scanned segment's tail.
    pub truncated_bytes: u64,
    /// True when the truncation removed corrupt (not merely torn) bytes.
    pub corruption_repaired: bool,
}

/// Result of a full end-to-end integrity scan.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// True only if every record decodes, every CRC passes, every chain link
    /// matches, and sequences are contiguous from 1.
    pub valid: bool,
    pub total_records: u64,
    pub last_sequence: u64,
    pub segments_scanned: usize,
    /// Segment file names that failed verification.
    pub corrupted_segments: Vec<String>,
    /// False when a `prev_hash` link or stored record hash did not match.
    pub chain_valid: bool,
    /// True when the last segment ends in a torn record (recoverable).
    pub truncated_tail: bool,
    /// First failure, human-readable.
    pub error: Option<String>,
}

struct WalInner {
    active: Segment,
    active_index: SegmentIndex,
    next_sequence: u64,
    last_hash: Hash32,
}

struct IntervalFlusher {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Write-ahead log over a directory of segments.
///
/// All mutation happens under one internal mutex: the engine is the single
/// writer for its directory, enforced by [`DirLock`]. `append` never fsyncs
/// on its own unless the sync mode is `Immediate`; group committers batch
/// the fsync via [`Wal::flush`].
pub struct Wal {
    dir: PathBuf,
    options: WalOptions,
    recorder: Arc<dyn MetricsRecorder>,
    inner: Arc<Mutex<WalInner>>,
    flusher: Mutex<Option<IntervalFlusher>>,
    closed: AtomicBool,
    _lock: DirLock,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Lists `(first_sequence, path)` for every segment in `dir`, ascending.
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == LOCK_FILE_NAME || name.ends_with(&format!(".{INDEX_EXT}")) {
            continue;
        }
        if let Some(seq) = parse_segment_file_name(name) {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

impl Wal {
    /// Opens (or creates) a WAL directory, performing recovery if needed.
    pub fn open(dir: impl Into<PathBuf>, options: WalOptions) -> Result<(Self, RecoveryInfo)> {
        Self::open_with_recorder(dir, options, Arc::new(NoopRecorder))
    }

    /// Opens a WAL with an injected metrics recorder.
    pub fn open_with_recorder(
        dir: impl Into<PathBuf>,
        options: WalOptions,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Result<(Self, RecoveryInfo)> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let lock = DirLock::acquire(&dir)?;

        let segments = list_segments(&dir)?;
        let mut info = RecoveryInfo {
            segments_found: segments.len(),
            ..RecoveryInfo::default()
        };

        let (active, next_sequence, last_hash) = if segments.is_empty() {
            let active = Segment::create(&dir, 1, options.max_segment_bytes)?;
            (active, 1u64, ZERO_HASH)
        } else {
            let (first_seq, path) = segments
                .last()
                .cloned()
                .expect("segments is non-empty: just checked");
            let recovered =
                recover_segment(&path, first_seq, options.repair_on_open, &mut info)?;

            // An empty highest segment inherits chain state from its
            // predecessor (it was rotated in but never written to).
            let (next_sequence, last_hash) = match (recovered, segments.len()) {
                (Some(state), _) => state,
                (None, 1) => (first_seq, ZERO_HASH),
                (None, _) => {
                    let (prev_seq, prev_path) = segments[segments.len() - 2].clone();
                    let mut prev_info = RecoveryInfo::default();
                    recover_segment(&prev_path, prev_seq, false, &mut prev_info)?
                        .ok_or_else(|| WalError::Integrity {
                            segment: prev_path.display().to_string(),
                            reason: "rotated segment holds no records".to_string(),
                        })?
                }
            };

            let active = Segment::open(path, first_seq, options.max_segment_bytes)?;
            (active, next_sequence, last_hash)
        };

        if info.truncated_bytes > 0 {
            let status = if info.corruption_repaired { "repaired" } else { "torn_tail" };
            recorder.counter("wal_recoveries_total", &[("status", status)], 1);
        }
        recorder.gauge("wal_segments_total", &[], segments.len().max(1) as f64);

        let first_active_seq = active.first_sequence();
        let wal = Self {
            dir,
            recorder,
            inner: Arc::new(Mutex::new(WalInner {
                active_index: SegmentIndex::new(first_active_seq),
                active,
                next_sequence,
                last_hash,
            })),
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
            options,
            _lock: lock,
        };
        wal.rebuild_active_index()?;

        if let SyncMode::Interval(period) = wal.options.sync_mode {
            wal.spawn_interval_flusher(period);
        }

        tracing::info!(
            dir = %wal.dir.display(),
            segments = info.segments_found,
            next_sequence = next_sequence,
            truncated_bytes = info.truncated_bytes,
            "opened WAL"
        );
        Ok((wal, info))
    }

    fn rebuild_active_index(&self) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.active.len() > 0 {
            inner.active_index =
                SegmentIndex::rebuild(inner.active.path(), inner.active.first_sequence())?;
        }
        Ok(())
    }

    fn spawn_interval_flusher(&self, period: Duration) {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("gneiss-wal-flusher".into())
            .spawn(move || loop {
                match rx.recv_timeout(period) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let guard = inner.lock().expect("wal mutex poisoned");
                        if let Err(err) = guard.active.sync() {
                            tracing::error!(error = %err, "interval fsync failed");
                        }
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            })
            .expect("failed to spawn WAL flusher thread");
        *self.flusher.lock().expect("flusher mutex poisoned") =
            Some(IntervalFlusher { shutdown: tx, handle });
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, WalInner> {
        self.inner.lock().expect("wal mutex poisoned")
    }

    /// The WAL directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sequence the next appended record will receive.
    pub fn next_sequence(&self) -> u64 {
        self.lock_inner().next_sequence
    }

    /// Appends a payload as the next record and returns its sequence.
    ///
    /// Rotation triggers (size, age) are checked first; the record is encoded
    /// against the in-memory chain state and the state advances on success.
    /// Durability is the caller's responsibility via [`Wal::flush`] unless
    /// the sync mode is `Immediate`.
    pub fn append(
        &self,
        flags: RecordFlags,
        timestamp_nanos: i64,
        payload: &[u8],
    ) -> Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }

        let mut inner = self.lock_inner();
        let sequence = inner.next_sequence;
        let bytes = record::encode(&inner.last_hash, sequence, timestamp_nanos, flags, payload);

        if inner
            .active
            .wants_rotation(bytes.len() as u64, self.options.max_segment_age)
        {
            self.rotate(&mut inner)?;
        }

        let offset = match inner.active.append(&bytes) {
            Ok(offset) => offset,
            Err(WalError::SegmentFull { .. }) if inner.active.len() > 0 => {
                // Lost a race with the size estimate; rotate and retry once.
                self.rotate(&mut inner)?;
                inner.active.append(&bytes)?
            }
            Err(err) => return Err(err),
        };

        inner.active_index.push(offset);
        inner.last_hash = record::encoded_record_hash(&bytes);
        inner.next_sequence = sequence + 1;

        if self.options.sync_mode == SyncMode::Immediate {
            inner.active.sync()?;
        }

        self.recorder
            .gauge("wal_size_bytes", &[], inner.active.len() as f64);
        Ok(sequence)
    }

    /// Rotates the active segment: one final fsync, sidecar index write,
    /// then a fresh segment named by the next sequence.
    fn rotate(&self, inner: &mut WalInner) -> Result<()> {
        // Closing: the outgoing segment gets its final fsync before the new
        // one opens, so rotation never weakens durability.
        inner.active.sync()?;

        let index_path = inner
            .active
            .path()
            .with_extension(INDEX_EXT);
        if let Err(err) = inner.active_index.save(&index_path) {
            // The sidecar is rebuildable; losing it is not a write failure.
            tracing::warn!(error = %err, "failed to write sidecar index");
        }

        let old_first = inner.active.first_sequence();
        inner.active = Segment::create(&self.dir, inner.next_sequence, self.options.max_segment_bytes)?;
        inner.active_index = SegmentIndex::new(inner.next_sequence);

        self.recorder.counter("wal_segments_total", &[], 1);
        tracing::info!(
            old_segment = %segment_file_name(old_first),
            new_segment = %segment_file_name(inner.next_sequence),
            "rotated segment"
        );
        Ok(())
    }

    /// Fsyncs the active segment.
    pub fn flush(&self) -> Result<()> {
        let inner = self.lock_inner();
        inner.active.sync()
    }

    /// Scans every segment end-to-end, validating CRCs, record hashes, the
    /// chain, and sequence continuity.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let inner = self.lock_inner();
        inner.active.sync()?;
        let segments = list_segments(&self.dir)?;
        drop(inner);

        let mut report = IntegrityReport {
            valid: true,
            total_records: 0,
            last_sequence: 0,
            segments_scanned: segments.len(),
            corrupted_segments: Vec::new(),
            chain_valid: true,
            truncated_tail: false,
            error: None,
        };

        // A pruned WAL no longer starts at sequence 1: the scan starts at
        // the first remaining segment, and only a genesis WAL pins the first
        // prev_hash to zero.
        let mut expected_seq: u64 = segments.first().map_or(1, |(seq, _)| *seq);
        let mut expected_prev: Option<Hash32> = if expected_seq == 1 {
            Some(ZERO_HASH)
        } else {
            None
        };
        let last_index = segments.len().saturating_sub(1);

        for (position, (first_seq, path)) in segments.iter().enumerate() {
            let name = segment_file_name(*first_seq);
            let mut fail = |report: &mut IntegrityReport, reason: String| {
                report.valid = false;
                if report.error.is_none() {
                    report.error = Some(format!("{name}: {reason}"));
                }
                if !report.corrupted_segments.contains(&name) {
                    report.corrupted_segments.push(name.clone());
                }
            };

            if *first_seq != expected_seq {
                fail(
                    &mut report,
                    format!("starts at sequence {first_seq}, expected {expected_seq}"),
                );
                self.recorder.counter("wal_corruptions_total", &[], 1);
                break;
            }

            let scan = SegmentScan::read(path)?;
            for record in &scan.records {
                if record.sequence != expected_seq {
                    fail(
                        &mut report,
                        format!("sequence {} where {expected_seq} expected", record.sequence),
                    );
                    break;
                }
                if expected_prev.is_some_and(|prev| record.prev_hash != prev) {
                    report.chain_valid = false;
                    fail(
                        &mut report,
                        format!("hash chain broken at sequence {}", record.sequence),
                    );
                    break;
                }
                if !record.verify_hash() {
                    report.chain_valid = false;
                    fail(
                        &mut report,
                        format!("record hash mismatch at sequence {}", record.sequence),
                    );
                    break;
                }
                expected_prev = Some(record.record_hash);
                expected_seq += 1;
                report.total_records += 1;
            }

            if !report.valid {
                self.recorder.counter("wal_corruptions_total", &[], 1);
                break;
            }

            match &scan.tail {
                TailState::Clean => {}
                TailState::Torn { offset } if position == last_index => {
                    report.truncated_tail = true;
                    tracing::warn!(segment = %name, offset, "torn tail on last segment");
                }
                TailState::Torn { offset } => {
                    fail(&mut report, format!("torn record at offset {offset}"));
                    self.recorder.counter("wal_corruptions_total", &[], 1);
                    break;
                }
                TailState::Corrupt { offset, reason } => {
                    fail(
                        &mut report,
                        format!("corrupt bytes at offset {offset}: {reason}"),
                    );
                    self.recorder.counter("wal_corruptions_total", &[], 1);
                    break;
                }
            }
        }

        report.last_sequence = expected_seq.saturating_sub(1);
        Ok(report)
    }

    /// Reads decoded records with sequences in `[from_seq, to_seq]`.
    ///
    /// Linear within each overlapping segment; the sidecar index is used to
    /// seek to the first requested record where available.
    pub fn read_range(&self, from_seq: u64, to_seq: u64) -> Result<Vec<Record>> {
        let inner = self.lock_inner();
        let segments = list_segments(&self.dir)?;
        drop(inner);

        let mut results = Vec::new();
        for (i, (first_seq, path)) in segments.iter().enumerate() {
            let next_first = segments.get(i + 1).map(|(seq, _)| *seq);
            if next_first.is_some_and(|next| next <= from_seq) {
                continue;
            }
            if *first_seq > to_seq {
                break;
            }

            let start_offset = if from_seq > *first_seq {
                let index_path = path.with_extension(INDEX_EXT);
                SegmentIndex::load_or_rebuild(path, &index_path, *first_seq)?
                    .lookup(from_seq)
                    .unwrap_or(0)
            } else {
                0
            };

            let data: bytes::Bytes = std::fs::read(path)?.into();
            for record in SegmentIter::new(data, start_offset) {
                if record.sequence > to_seq {
                    return Ok(results);
                }
                if record.sequence >= from_seq {
                    results.push(record);
                }
            }
        }
        Ok(results)
    }

    /// Deletes closed segments whose newest record is older than `cutoff`
    /// nanoseconds since the epoch. The active segment is never pruned.
    ///
    /// Callers enforce the retention floor: `cutoff` must already honor the
    /// active compliance profile's minimum retention.
    pub fn prune_segments(&self, cutoff_nanos: i64) -> Result<usize> {
        let inner = self.lock_inner();
        let active_first = inner.active.first_sequence();
        let segments = list_segments(&self.dir)?;
        drop(inner);

        let mut pruned = 0;
        for (first_seq, path) in segments {
            if first_seq >= active_first {
                continue;
            }
            let scan = SegmentScan::read(&path)?;
            let newest = scan.records.iter().map(|r| r.timestamp_nanos).max();
            if newest.is_some_and(|ts| ts < cutoff_nanos) {
                std::fs::remove_file(&path)?;
                let _ = std::fs::remove_file(path.with_extension(INDEX_EXT));
                pruned += 1;
                tracing::info!(segment = %segment_file_name(first_seq), "pruned segment");
            }
        }
        Ok(pruned)
    }

    /// Flushes and shuts down background work. Further appends fail with
    /// [`WalError::Closed`]. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(flusher) = self.flusher.lock().expect("flusher mutex poisoned").take() {
            let _ = flusher.shutdown.send(());
            let _ = flusher.handle.join();
        }
        self.flush()
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "failed to flush WAL during drop");
        }
    }
}

/// Scans one segment for recovery, truncating an invalid tail when allowed.
///
/// Returns `Some((next_sequence, last_hash))` from the last valid record, or
/// `None` when the segment holds no valid records.
fn recover_segment(
    path: &Path,
    first_seq: u64,
    repair: bool,
    info: &mut RecoveryInfo,
) -> Result<Option<(u64, Hash32)>> {
    let scan = SegmentScan::read(path)?;
    let name = path.display().to_string();

    // Records must be internally consistent: contiguous sequences starting
    // at the file-name sequence, with a continuous intra-segment chain.
    let mut valid_len = 0u64;
    let mut state: Option<(u64, Hash32)> = None;
    let mut violation: Option<String> = None;
    let mut expected_seq = first_seq;

    for record in &scan.records {
        let chain_ok = match &state {
            Some((_, last_hash)) => record.prev_hash == *last_hash,
            None => true,
        };
        if record.sequence != expected_seq {
            violation = Some(format!(
                "sequence {} where {expected_seq} expected",
                record.sequence
            ));
            break;
        }
        if !chain_ok || !record.verify_hash() {
            violation = Some(format!("hash chain broken at sequence {}", record.sequence));
            break;
        }
        valid_len += record.encoded_len() as u64;
        state = Some((record.sequence + 1, record.record_hash));
        expected_seq += 1;
    }

    let file_len = std::fs::metadata(path)?.len();
    let (needs_truncate, is_corruption) = match (&violation, &scan.tail) {
        (Some(_), _) => (true, true),
        (None, TailState::Clean) => (false, false),
        (None, TailState::Torn { .. }) => (valid_len < file_len, false),
        (None, TailState::Corrupt { .. }) => (true, true),
    };

    if needs_truncate {
        let reason = violation
            .or_else(|| match &scan.tail {
                TailState::Corrupt { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "torn tail".to_string());

        if is_corruption && !repair {
            return Err(WalError::Integrity {
                segment: name,
                reason,
            });
        }

        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;

        info.truncated_bytes += file_len - valid_len;
        info.corruption_repaired |= is_corruption;
        tracing::warn!(
            segment = %name,
            truncated_bytes = file_len - valid_len,
            corruption = is_corruption,
            %reason,
            "truncated invalid segment tail during recovery"
        );
    }

    info.valid_records += state.as_ref().map_or(0, |(next, _)| next - first_seq);
    Ok(state)
}
