//! Group commit: amortizing fsync across concurrent writers.
//!
//! Callers enqueue payloads and park on a completion handle; a single
//! background worker swaps the pending batch out under the lock, appends
//! every record, issues **one** fsync, and then signals every waiter with the
//! shared result. Batches flush when they reach `batch_size` or when
//! `max_delay` has elapsed since the first enqueue, whichever comes first.
//!
//! Ordering: within one batch, records are appended in arrival order; across
//! batches, the single worker makes flushes strictly FIFO. The state lock is
//! never held across the fsync or the waiter notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{Result, WalError};
use crate::record::RecordFlags;
use crate::wal::Wal;

/// Default events per flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time the first event in a batch waits before a timer flush.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10);

/// Group-commit tuning knobs.
#[derive(Debug, Clone)]
pub struct CommitterConfig {
    /// Flush once this many events are pending.
    pub batch_size: usize,
    /// Flush this long after the first pending event arrives.
    pub max_delay: Duration,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Lock-free observability counters shared by both committer variants.
#[derive(Debug, Default)]
pub struct CommitterStats {
    pub batch_count: AtomicU64,
    pub event_count: AtomicU64,
    pub timer_flushes: AtomicU64,
    pub size_flushes: AtomicU64,
    pub total_latency_micros: AtomicU64,
    /// Events whose write failed (lock-free variant only: there is no caller
    /// to hand the error to).
    pub dropped_events: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitterStatsSnapshot {
    pub batch_count: u64,
    pub event_count: u64,
    pub timer_flushes: u64,
    pub size_flushes: u64,
    pub total_latency_micros: u64,
    pub dropped_events: u64,
}

impl CommitterStats {
    pub fn snapshot(&self) -> CommitterStatsSnapshot {
        CommitterStatsSnapshot {
            batch_count: self.batch_count.load(Ordering::Relaxed),
            event_count: self.event_count.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            total_latency_micros: self.total_latency_micros.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

/// One pending write plus its caller's completion handle.
struct Entry {
    flags: RecordFlags,
    timestamp_nanos: i64,
    payload: Bytes,
    done: mpsc::SyncSender<std::result::Result<u64, String>>,
}

struct State {
    pending: Vec<Entry>,
    first_enqueued_at: Option<Instant>,
    closing: bool,
}

struct Shared {
    wal: Arc<Wal>,
    config: CommitterConfig,
    state: Mutex<State>,
    wakeup: Condvar,
    stats: CommitterStats,
}

/// The mutex group committer: synchronous per-caller semantics, one fsync
/// per batch.
pub struct GroupCommitter {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for GroupCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCommitter")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl GroupCommitter {
    /// Creates a committer over `wal` and starts its flusher worker.
    pub fn new(wal: Arc<Wal>, config: CommitterConfig) -> Self {
        let shared = Arc::new(Shared {
            wal,
            config,
            state: Mutex::new(State {
                pending: Vec::new(),
                first_enqueued_at: None,
                closing: false,
            }),
            wakeup: Condvar::new(),
            stats: CommitterStats::default(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("gneiss-group-commit".into())
            .spawn(move || worker_loop(&worker_shared))
            .expect("failed to spawn group-commit worker");

        Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues one payload and blocks until its batch is on stable storage.
    ///
    /// Returns the record's WAL sequence. When this returns `Ok`, the record
    /// survives a crash.
    pub fn add(&self, timestamp_nanos: i64, flags: RecordFlags, payload: Bytes) -> Result<u64> {
        let rx = self.enqueue_one(timestamp_nanos, flags, payload)?;
        Self::await_outcome(&rx)
    }

    /// Enqueues several payloads atomically (they land in one batch in order)
    /// and blocks until all are durable.
    pub fn add_batch(
        &self,
        entries: Vec<(i64, RecordFlags, Bytes)>,
    ) -> Result<Vec<u64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let receivers = {
            let mut state = self.lock_state();
            if state.closing {
                return Err(WalError::Closed);
            }
            if state.pending.is_empty() {
                state.first_enqueued_at = Some(Instant::now());
            }
            let receivers: Vec<_> = entries
                .into_iter()
                .map(|(timestamp_nanos, flags, payload)| {
                    let (done, rx) = mpsc::sync_channel(1);
                    state.pending.push(Entry {
                        flags,
                        timestamp_nanos,
                        payload,
                        done,
                    });
                    rx
                })
                .collect();
            receivers
        };
        self.shared.wakeup.notify_one();

        receivers.iter().map(Self::await_outcome).collect()
    }

    fn enqueue_one(
        &self,
        timestamp_nanos: i64,
        flags: RecordFlags,
        payload: Bytes,
    ) -> Result<mpsc::Receiver<std::result::Result<u64, String>>> {
        let (done, rx) = mpsc::sync_channel(1);
        {
            let mut state = self.lock_state();
            if state.closing {
                return Err(WalError::Closed);
            }
            if state.pending.is_empty() {
                state.first_enqueued_at = Some(Instant::now());
            }
            state.pending.push(Entry {
                flags,
                timestamp_nanos,
                payload,
                done,
            });
        }
        self.shared.wakeup.notify_one();
        Ok(rx)
    }

    fn await_outcome(rx: &mpsc::Receiver<std::result::Result<u64, String>>) -> Result<u64> {
        match rx.recv() {
            Ok(Ok(sequence)) => Ok(sequence),
            Ok(Err(message)) => Err(WalError::CommitFailed { message }),
            Err(_) => Err(WalError::CommitFailed {
                message: "commit worker exited before signalling".to_string(),
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().expect("committer mutex poisoned")
    }

    /// Observability counters.
    pub fn stats(&self) -> CommitterStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Flushes remaining events, signals their waiters, and joins the
    /// worker. Further `add` calls fail with [`WalError::Closed`].
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            if state.closing {
                return Ok(());
            }
            state.closing = true;
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for GroupCommitter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let batch = {
            let mut state = shared.state.lock().expect("committer mutex poisoned");
            loop {
                if state.closing && state.pending.is_empty() {
                    return;
                }
                if state.pending.is_empty() {
                    state = shared
                        .wakeup
                        .wait(state)
                        .expect("committer mutex poisoned");
                    continue;
                }

                let waited = state
                    .first_enqueued_at
                    .map_or(Duration::ZERO, |t| t.elapsed());
                let size_trigger = state.pending.len() >= shared.config.batch_size;
                let timer_trigger = waited >= shared.config.max_delay;

                if size_trigger || timer_trigger || state.closing {
                    if size_trigger {
                        shared.stats.size_flushes.fetch_add(1, Ordering::Relaxed);
                    } else if timer_trigger {
                        shared.stats.timer_flushes.fetch_add(1, Ordering::Relaxed);
                    }
                    state.first_enqueued_at = None;
                    break std::mem::take(&mut state.pending);
                }

                let (guard, _) = shared
                    .wakeup
                    .wait_timeout(state, shared.config.max_delay - waited)
                    .expect("committer mutex poisoned");
                state = guard;
            }
        };

        flush_batch(shared, batch);
    }
}

/// Writes one batch and signals every waiter. Runs with no locks held.
fn flush_batch(shared: &Shared, batch: Vec<Entry>) {
    let started = Instant::now();
    let mut sequences = Vec::with_capacity(batch.len());
    let mut failure: Option<String> = None;

    for entry in &batch {
        match shared
            .wal
            .append(entry.flags, entry.timestamp_nanos, &entry.payload)
        {
            Ok(sequence) => sequences.push(sequence),
            Err(err) => {
                failure = Some(err.to_string());
                break;
            }
        }
    }

    if failure.is_none() {
        if let Err(err) = shared.wal.flush() {
            failure = Some(err.to_string());
        }
    }

    shared.stats.batch_count.fetch_add(1, Ordering::Relaxed);
    shared
        .stats
        .event_count
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
    shared
        .stats
        .total_latency_micros
        .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

    if let Some(message) = failure {
        tracing::error!(batch = batch.len(), error = %message, "group-commit flush failed");
        for entry in &batch {
            let _ = entry.done.send(Err(message.clone()));
        }
    } else {
        for (entry, sequence) in batch.iter().zip(sequences) {
            let _ = entry.done.send(Ok(sequence));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{Wal, WalOptions};
    use tempfile::TempDir;

    fn open_committer(dir: &std::path::Path, config: CommitterConfig) -> (Arc<Wal>, GroupCommitter) {
        let (wal, _) = Wal::open(dir, WalOptions::default()).unwrap();
        let wal = Arc::new(wal);
        let committer = GroupCommitter::new(Arc::clone(&wal), config);
        (wal, committer)
    }

    #[test]
    fn add_returns_the_assigned_sequence() {
        let dir = TempDir::new().unwrap();
        let (_wal, committer) = open_committer(dir.path(), CommitterConfig::default());

        let a = committer
            .add(1, RecordFlags::empty(), Bytes::from_static(b"a"))
            .unwrap();
        let b = committer
            .add(2, RecordFlags::empty(), Bytes::from_static(b"b"))
            .unwrap();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn batch_lands_in_order() {
        let dir = TempDir::new().unwrap();
        let (wal, committer) = open_committer(dir.path(), CommitterConfig::default());

        let entries = (0..10)
            .map(|i| (i as i64, RecordFlags::empty(), Bytes::from(format!("e{i}"))))
            .collect();
        let sequences = committer.add_batch(entries).unwrap();
        assert_eq!(sequences, (1..=10).collect::<Vec<u64>>());

        let records = wal.read_range(1, 10).unwrap();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(&record.payload[..], format!("e{i}").as_bytes());
        }
    }

    #[test]
    fn concurrent_producers_preserve_per_producer_order() {
        let dir = TempDir::new().unwrap();
        let (wal, committer) = open_committer(
            dir.path(),
            CommitterConfig {
                batch_size: 8,
                max_delay: Duration::from_millis(2),
            },
        );
        let committer = Arc::new(committer);

        let mut handles = Vec::new();
        for producer in 0..4u32 {
            let committer = Arc::clone(&committer);
            handles.push(std::thread::spawn(move || {
                let mut sequences = Vec::new();
                for i in 0..25u32 {
                    let payload = Bytes::from(format!("p{producer}-{i}"));
                    sequences.push(committer.add(0, RecordFlags::empty(), payload).unwrap());
                }
                sequences
            }));
        }

        for handle in handles {
            let sequences = handle.join().unwrap();
            // Per-producer insertion order implies strictly increasing
            // sequences for that producer.
            assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        }

        let report = wal.verify_integrity().unwrap();
        assert!(report.valid);
        assert_eq!(report.total_records, 100);
    }

    #[test]
    fn timer_flush_fires_without_filling_the_batch() {
        let dir = TempDir::new().unwrap();
        let (_wal, committer) = open_committer(
            dir.path(),
            CommitterConfig {
                batch_size: 1_000,
                max_delay: Duration::from_millis(5),
            },
        );

        committer
            .add(0, RecordFlags::empty(), Bytes::from_static(b"lonely"))
            .unwrap();

        let stats = committer.stats();
        assert_eq!(stats.event_count, 1);
        assert_eq!(stats.batch_count, 1);
        assert_eq!(stats.timer_flushes, 1);
        assert_eq!(stats.size_flushes, 0);
    }

    #[test]
    fn size_flush_counts_full_batches() {
        let dir = TempDir::new().unwrap();
        let (_wal, committer) = open_committer(
            dir.path(),
            CommitterConfig {
                batch_size: 5,
                max_delay: Duration::from_secs(10),
            },
        );

        let entries = (0..5)
            .map(|i| (i as i64, RecordFlags::empty(), Bytes::from_static(b"x")))
            .collect();
        committer.add_batch(entries).unwrap();

        let stats = committer.stats();
        assert_eq!(stats.size_flushes, 1);
        assert_eq!(stats.event_count, 5);
    }

    #[test]
    fn close_rejects_new_work_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (_wal, committer) = open_committer(dir.path(), CommitterConfig::default());

        committer
            .add(0, RecordFlags::empty(), Bytes::from_static(b"final"))
            .unwrap();
        committer.close().unwrap();
        committer.close().unwrap();

        let err = committer
            .add(0, RecordFlags::empty(), Bytes::from_static(b"late"))
            .unwrap_err();
        assert!(matches!(err, WalError::Closed));
    }

    #[test]
    fn events_survive_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (_wal, committer) = open_committer(dir.path(), CommitterConfig::default());
            for i in 0..20 {
                committer
                    .add(i, RecordFlags::empty(), Bytes::from(format!("e{i}")))
                    .unwrap();
            }
            committer.close().unwrap();
        }

        let (wal, info) = Wal::open(dir.path(), WalOptions::default()).unwrap();
        assert_eq!(info.valid_records, 20);
        assert!(wal.verify_integrity().unwrap().valid);
    }
}
