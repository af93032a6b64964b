//! The audit sink: the embeddable front door.
//!
//! Ownership is a strict tree: the sink owns the WAL (via its group
//! committer), the compliance engine (which owns the key manager and
//! signature chain), and one replicator per backend. Nothing references
//! back up the tree.
//!
//! ```text
//! AuditSink
//! ├── GroupCommitter ── Wal ── segments on disk
//! ├── ComplianceEngine ── KeyManager + SignatureChain (+ Signer)
//! └── Replicator per Backend ── filesystem / object stores
//! ```
//!
//! The contract: once [`AuditSink::emit`] returns a durable ack, the event
//! is recoverable after any crash, power loss, or torn write, and tampering
//! with persisted data is detectable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use gneiss_backend::{Backend, BackendIntegrityReport, Replicator};
use gneiss_compliance::ComplianceEngine;
use gneiss_crypto::ChainVerification;
use gneiss_resilience::{ResilienceManager, RetryStatsSnapshot};
use gneiss_types::{LogEvent, MetricsRecorder};
use gneiss_wal::{
    CommitterStatsSnapshot, GroupCommitter, IntegrityReport, OptimizedGroupCommitter, RecordFlags,
    RecoveryInfo, Wal, WalError,
};

use crate::config::{CommitMode, SinkBuilder};
use crate::error::{Result, SinkError};

/// Callback invoked when a WAL write fails after the committer's attempts.
pub type FailureHandler = Box<dyn Fn(&SinkError) + Send + Sync>;

/// How an emitted event was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitAck {
    /// The event is on stable storage; `sequence` is its WAL sequence.
    Durable { sequence: u64 },
    /// The event is queued in the lock-free ring; durability is confirmed
    /// by `verify_integrity` or a clean shutdown.
    Enqueued,
}

enum Committer {
    Mutex(GroupCommitter),
    LockFree(OptimizedGroupCommitter),
}

/// Combined integrity view across the WAL and every backend.
#[derive(Debug)]
pub struct SinkIntegrityReport {
    pub wal: IntegrityReport,
    pub backends: Vec<BackendIntegrityReport>,
}

impl SinkIntegrityReport {
    /// True when the WAL and every backend verified clean.
    pub fn valid(&self) -> bool {
        self.wal.valid && self.backends.iter().all(|b| b.valid)
    }
}

/// Write-path counters exposed for observability.
#[derive(Debug, Clone)]
pub struct SinkStats {
    pub committer: CommitterStatsSnapshot,
    pub retry: RetryStatsSnapshot,
    pub replication_dropped_batches: u64,
    pub replication_failed_batches: u64,
}

/// Guaranteed-delivery audit-event sink.
pub struct AuditSink {
    wal: Arc<Wal>,
    committer: Committer,
    compliance: Option<ComplianceEngine>,
    backends: Vec<Arc<dyn Backend>>,
    replicators: Vec<Replicator>,
    resilience: Arc<ResilienceManager>,
    recorder: Arc<dyn MetricsRecorder>,
    failure_handler: Option<FailureHandler>,
    panic_on_failure: bool,
    recovery: RecoveryInfo,
    closed: AtomicBool,
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("wal_dir", &self.wal.dir())
            .field("profile", &self.compliance.as_ref().map(|c| c.profile().name))
            .field("backends", &self.backends.len())
            .finish_non_exhaustive()
    }
}

impl AuditSink {
    /// Starts building a sink.
    pub fn builder() -> SinkBuilder {
        SinkBuilder::default()
    }

    pub(crate) fn from_builder(builder: SinkBuilder) -> Result<Self> {
        let SinkBuilder {
            wal_path,
            wal_options,
            commit,
            compliance,
            backends,
            retry,
            breaker,
            recorder,
            failure_handler,
            panic_on_failure,
            replication_queue,
        } = builder;

        let wal_path = wal_path.expect("validate() checked wal_path");
        let (wal, recovery) =
            Wal::open_with_recorder(wal_path, wal_options, Arc::clone(&recorder))?;
        let wal = Arc::new(wal);

        let committer = match commit {
            CommitMode::Mutex(config) => {
                Committer::Mutex(GroupCommitter::new(Arc::clone(&wal), config))
            }
            CommitMode::LockFree(config) => {
                Committer::LockFree(OptimizedGroupCommitter::new(Arc::clone(&wal), config))
            }
        };

        let compliance = match compliance {
            Some(settings) => {
                let profile = match settings.retention_days {
                    Some(days) => settings.profile.with_retention_days(days)?,
                    None => settings.profile,
                };
                let mut engine_builder =
                    ComplianceEngine::builder(profile).mask_enabled(settings.mask_enabled);
                if let Some(key) = settings.encryption_key {
                    engine_builder = engine_builder.encryption_key(key);
                }
                if let Some(signer) = settings.signer {
                    engine_builder = engine_builder.signer(signer);
                }
                Some(engine_builder.build()?)
            }
            None => None,
        };

        let resilience = Arc::new(ResilienceManager::with_recorder(
            retry,
            breaker,
            Arc::clone(&recorder),
        ));

        let replicators = backends
            .iter()
            .map(|backend| {
                Replicator::spawn(
                    Arc::clone(backend),
                    Arc::clone(&resilience),
                    Arc::clone(&recorder),
                    replication_queue,
                )
            })
            .collect();

        Ok(Self {
            wal,
            committer,
            compliance,
            backends,
            replicators,
            resilience,
            recorder,
            failure_handler,
            panic_on_failure,
            recovery,
            closed: AtomicBool::new(false),
        })
    }

    /// What recovery found when the WAL was opened.
    pub fn recovery_info(&self) -> &RecoveryInfo {
        &self.recovery
    }

    /// The active compliance engine, if a profile was configured.
    pub fn compliance(&self) -> Option<&ComplianceEngine> {
        self.compliance.as_ref()
    }

    /// Accepts one event.
    ///
    /// With the mutex committer this blocks until the event's batch has been
    /// fsynced and returns its WAL sequence; with the lock-free committer it
    /// returns immediately after enqueueing (or `BufferFull`).
    ///
    /// Replication to backends happens after local durability and never
    /// affects the result.
    pub fn emit(&self, event: &LogEvent) -> Result<EmitAck> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        let started = Instant::now();

        let (flags, payload, archived) = match &self.compliance {
            Some(engine) => {
                let (transformed, record) = engine.process(event)?;
                let mut flags = RecordFlags::empty();
                if record.encrypted {
                    flags = flags.with(RecordFlags::ENCRYPTED);
                }
                if record.signed {
                    flags = flags.with(RecordFlags::SIGNED);
                }
                (flags, Bytes::from(record.to_json_bytes()?), transformed)
            }
            None => {
                let payload = event
                    .to_canonical_json()
                    .map_err(gneiss_compliance::ComplianceError::Serialization)?;
                (RecordFlags::empty(), Bytes::from(payload), event.clone())
            }
        };

        let timestamp_nanos = archived.timestamp_nanos();
        let ack = match &self.committer {
            Committer::Mutex(committer) => {
                match committer.add(timestamp_nanos, flags, payload) {
                    Ok(sequence) => EmitAck::Durable { sequence },
                    Err(err) => return Err(self.escalate(err)),
                }
            }
            Committer::LockFree(committer) => {
                match committer.add(timestamp_nanos, flags, payload) {
                    Ok(()) => EmitAck::Enqueued,
                    Err(err) => return Err(self.escalate(err)),
                }
            }
        };

        for replicator in &self.replicators {
            replicator.offer(vec![archived.clone()]);
        }

        self.recorder
            .counter("events_total", &[("status", "ok")], 1);
        self.recorder.histogram(
            "write_duration_seconds",
            &[],
            started.elapsed().as_secs_f64(),
        );
        Ok(ack)
    }

    /// Classifies a committer error: ring saturation and closure go back to
    /// the caller untouched; a failed WAL write is a broken durability
    /// contract and escalates.
    fn escalate(&self, err: WalError) -> SinkError {
        match err {
            WalError::BufferFull { .. } | WalError::Closed => SinkError::Wal(err),
            other => {
                let failure = SinkError::CriticalFailure {
                    reason: other.to_string(),
                };
                tracing::error!(error = %other, "WAL write failed; durability contract broken");
                self.recorder
                    .counter("events_total", &[("status", "critical")], 1);
                if let Some(handler) = &self.failure_handler {
                    handler(&failure);
                }
                if self.panic_on_failure {
                    // Caller-selected escalation policy, never the default.
                    panic!("audit sink critical failure: {failure}");
                }
                failure
            }
        }
    }

    /// Reads decoded WAL records with sequences in `[from, to]`.
    ///
    /// Linear scan over the overlapping segments; audit review and export,
    /// not a query path.
    pub fn read_records(&self, from: u64, to: u64) -> Result<Vec<gneiss_wal::Record>> {
        Ok(self.wal.read_range(from, to)?)
    }

    /// Fsyncs the WAL and flushes every backend buffer.
    pub fn flush(&self) -> Result<()> {
        self.wal.flush()?;
        for backend in &self.backends {
            backend.flush()?;
        }
        Ok(())
    }

    /// Scans the WAL end-to-end and sweeps every backend.
    pub fn verify_integrity(&self) -> Result<SinkIntegrityReport> {
        let wal = self.wal.verify_integrity()?;
        let mut backends = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            backends.push(backend.verify_integrity()?);
        }
        Ok(SinkIntegrityReport { wal, backends })
    }

    /// Walks the compliance signature chain, when a signing profile is
    /// active.
    pub fn verify_chain(&self) -> Option<ChainVerification> {
        self.compliance.as_ref().map(ComplianceEngine::verify_chain)
    }

    /// Deletes closed WAL segments every record of which is older than the
    /// active profile's configured retention. Without a profile nothing is
    /// pruned (there is no retention floor to honor).
    pub fn prune_expired(&self) -> Result<usize> {
        let Some(engine) = &self.compliance else {
            return Ok(0);
        };
        let retention = engine.profile().retention_period();
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let cutoff_nanos = cutoff.timestamp_nanos_opt().unwrap_or(i64::MIN);
        Ok(self.wal.prune_segments(cutoff_nanos)?)
    }

    /// Write-path counters.
    pub fn stats(&self) -> SinkStats {
        let committer = match &self.committer {
            Committer::Mutex(c) => c.stats(),
            Committer::LockFree(c) => c.stats(),
        };
        SinkStats {
            committer,
            retry: self.resilience.retry_stats(),
            replication_dropped_batches: self
                .replicators
                .iter()
                .map(Replicator::dropped_batches)
                .sum(),
            replication_failed_batches: self
                .replicators
                .iter()
                .map(Replicator::failed_batches)
                .sum(),
        }
    }

    /// Drains and joins every worker, then closes the WAL. Idempotent;
    /// further emits fail with [`SinkError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.committer {
            Committer::Mutex(c) => c.close()?,
            Committer::LockFree(c) => c.close()?,
        }
        for replicator in &self.replicators {
            replicator.close();
        }
        self.wal.close()?;
        tracing::info!(dir = %self.wal.dir().display(), "audit sink closed");
        Ok(())
    }
}

impl Drop for AuditSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "failed to close audit sink during drop");
        }
    }
}
