//! The backend contract.
//!
//! A backend is a long-term archive target for audit events. Unlike the
//! closed crypto enums, this is an open trait: embedders plug in their own
//! stores. Replication to backends is best-effort and asynchronous:
//! durability lives in the WAL, backends provide off-host redundancy and
//! retention enforcement.

use chrono::{DateTime, Utc};
use gneiss_types::LogEvent;

use crate::error::Result;

/// Per-backend integrity sweep result.
#[derive(Debug, Clone)]
pub struct BackendIntegrityReport {
    pub backend: String,
    /// True when every archived object decoded and every checksum matched.
    pub valid: bool,
    /// Files or objects examined.
    pub objects_checked: usize,
    /// Events successfully decoded across all objects.
    pub events_decoded: u64,
    /// Per-object failures; a failing object is reported, not fatal to the
    /// sweep.
    pub failures: Vec<String>,
    /// Non-fatal observations (e.g. shadow copy count drift).
    pub warnings: Vec<String>,
}

impl BackendIntegrityReport {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            valid: true,
            objects_checked: 0,
            events_decoded: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(&mut self, message: String) {
        self.valid = false;
        self.failures.push(message);
    }
}

/// A durable archive target for audit events.
///
/// Implementations must be `Send + Sync`: one replicator thread per backend
/// drives them, but `verify_integrity` may run from other threads.
pub trait Backend: Send + Sync {
    /// Stable backend name, used for breaker registration and metrics.
    fn name(&self) -> &str;

    /// Writes one event. Default: a batch of one.
    fn write(&self, event: &LogEvent) -> Result<()> {
        self.write_batch(std::slice::from_ref(event))
    }

    /// Writes a batch of events. May buffer; durability on the remote store
    /// is best-effort until [`Backend::flush`].
    fn write_batch(&self, events: &[LogEvent]) -> Result<()>;

    /// Scans archived events with timestamps in `[start, end]`.
    ///
    /// Write-mostly backends may return [`Unsupported`](crate::BackendError::Unsupported).
    fn read_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<LogEvent>>;

    /// Decodes and checksums everything this backend has archived.
    fn verify_integrity(&self) -> Result<BackendIntegrityReport>;

    /// Pushes any buffered events to the store.
    fn flush(&self) -> Result<()>;

    /// Flushes and releases handles. Further writes fail.
    fn close(&self) -> Result<()>;
}
