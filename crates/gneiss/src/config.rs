//! Sink configuration and builder.
//!
//! Every knob the sink recognizes is validated here; a bad combination
//! fails `build()` with [`SinkError::ConfigInvalid`] before anything
//! touches disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gneiss_backend::{Backend, FilesystemBackend, FilesystemConfig};
use gneiss_compliance::ComplianceProfile;
use gneiss_crypto::{EncryptionKey, Signer, KEY_LEN};
use gneiss_resilience::{BreakerConfig, RetryPolicy};
use gneiss_types::{MetricsRecorder, NoopRecorder, SyncMode};
use gneiss_wal::{CommitterConfig, RingConfig, WalOptions, RECORD_OVERHEAD};

use crate::error::{Result, SinkError};
use crate::sink::{AuditSink, FailureHandler};

/// Which group-committer variant drives the write path.
#[derive(Debug, Clone)]
pub enum CommitMode {
    /// Synchronous per-caller acks; `emit` returns after the fsync.
    Mutex(CommitterConfig),
    /// Non-blocking ingest over a bounded ring; no per-call ack.
    LockFree(RingConfig),
}

impl Default for CommitMode {
    fn default() -> Self {
        CommitMode::Mutex(CommitterConfig::default())
    }
}

/// Compliance settings resolved at build time.
#[derive(Debug)]
pub(crate) struct ComplianceSettings {
    pub profile: ComplianceProfile,
    pub encryption_key: Option<EncryptionKey>,
    pub signer: Option<Signer>,
    pub mask_enabled: bool,
    pub retention_days: Option<u32>,
}

/// Builder for [`AuditSink`].
///
/// ```no_run
/// use gneiss::{AuditSink, ComplianceProfile};
///
/// # fn main() -> gneiss::Result<()> {
/// let sink = AuditSink::builder()
///     .wal_path("/var/lib/audit/wal")
///     .profile(ComplianceProfile::hipaa())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SinkBuilder {
    pub(crate) wal_path: Option<PathBuf>,
    pub(crate) wal_options: WalOptions,
    pub(crate) commit: CommitMode,
    pub(crate) compliance: Option<ComplianceSettings>,
    pub(crate) backends: Vec<Arc<dyn Backend>>,
    pub(crate) retry: RetryPolicy,
    pub(crate) breaker: BreakerConfig,
    pub(crate) recorder: Arc<dyn MetricsRecorder>,
    pub(crate) failure_handler: Option<FailureHandler>,
    pub(crate) panic_on_failure: bool,
    pub(crate) replication_queue: usize,
}

impl std::fmt::Debug for SinkBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkBuilder")
            .field("wal_path", &self.wal_path)
            .field("wal_options", &self.wal_options)
            .field("commit", &self.commit)
            .field("compliance", &self.compliance)
            .field("backends", &self.backends.len())
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("failure_handler", &self.failure_handler.is_some())
            .field("panic_on_failure", &self.panic_on_failure)
            .field("replication_queue", &self.replication_queue)
            .finish()
    }
}

impl Default for SinkBuilder {
    fn default() -> Self {
        Self {
            wal_path: None,
            wal_options: WalOptions::default(),
            commit: CommitMode::default(),
            compliance: None,
            backends: Vec::new(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            recorder: Arc::new(NoopRecorder),
            failure_handler: None,
            panic_on_failure: false,
            replication_queue: gneiss_backend::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl SinkBuilder {
    /// WAL directory (required).
    pub fn wal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wal_path = Some(path.into());
        self
    }

    /// WAL sync mode (default `Batch`; the group committer drives fsync).
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.wal_options.sync_mode = mode;
        self
    }

    /// Segment size rotation trigger (default 128 MiB).
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.wal_options.max_segment_bytes = bytes;
        self
    }

    /// Segment age rotation trigger (default 24 h).
    pub fn max_segment_age(mut self, age: Duration) -> Self {
        self.wal_options.max_segment_age = age;
        self
    }

    /// Allow open-time truncation of corrupt bytes (default off).
    pub fn repair_on_open(mut self, repair: bool) -> Self {
        self.wal_options.repair_on_open = repair;
        self
    }

    /// Use the mutex group committer with these knobs (the default).
    pub fn group_commit(mut self, batch_size: usize, max_delay: Duration) -> Self {
        self.commit = CommitMode::Mutex(CommitterConfig {
            batch_size,
            max_delay,
        });
        self
    }

    /// Use the lock-free committer with the given ring capacity.
    pub fn lock_free_commit(mut self, ring_capacity: usize) -> Self {
        self.commit = CommitMode::LockFree(RingConfig {
            capacity: ring_capacity,
            ..RingConfig::default()
        });
        self
    }

    /// Activate a compliance profile.
    pub fn profile(mut self, profile: ComplianceProfile) -> Self {
        self.compliance = Some(ComplianceSettings {
            profile,
            encryption_key: None,
            signer: None,
            mask_enabled: true,
            retention_days: None,
        });
        self
    }

    /// Explicit 32-byte encryption key (requires a profile).
    pub fn encryption_key(mut self, key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(SinkError::ConfigInvalid {
                reason: format!("encryption key must be {KEY_LEN} bytes, got {}", key.len()),
            });
        }
        match &mut self.compliance {
            Some(settings) => {
                settings.encryption_key =
                    Some(EncryptionKey::from_slice(key).map_err(|e| SinkError::ConfigInvalid {
                        reason: e.to_string(),
                    })?);
                Ok(self)
            }
            None => Err(SinkError::ConfigInvalid {
                reason: "encryption_key requires a compliance profile".to_string(),
            }),
        }
    }

    /// Explicit signer (requires a profile).
    pub fn signer(mut self, signer: Signer) -> Result<Self> {
        match &mut self.compliance {
            Some(settings) => {
                settings.signer = Some(signer);
                Ok(self)
            }
            None => Err(SinkError::ConfigInvalid {
                reason: "signer requires a compliance profile".to_string(),
            }),
        }
    }

    /// Toggle masking (default on; requires a profile).
    pub fn mask_enabled(mut self, enabled: bool) -> Self {
        if let Some(settings) = &mut self.compliance {
            settings.mask_enabled = enabled;
        }
        self
    }

    /// Retention override, validated against the profile at build time.
    pub fn retention_days(mut self, days: u32) -> Self {
        if let Some(settings) = &mut self.compliance {
            settings.retention_days = Some(days);
        }
        self
    }

    /// Adds a filesystem archive backend.
    pub fn filesystem_backend(mut self, config: FilesystemConfig) -> Result<Self> {
        let backend = FilesystemBackend::open(config)?;
        self.backends.push(Arc::new(backend));
        Ok(self)
    }

    /// Adds any backend implementation.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Retry policy for backend replication.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Breaker thresholds for backend replication.
    pub fn breaker_config(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Injects a metrics recorder.
    pub fn metrics_recorder(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Handler invoked on [`SinkError::CriticalFailure`].
    pub fn on_critical_failure(
        mut self,
        handler: impl Fn(&SinkError) + Send + Sync + 'static,
    ) -> Self {
        self.failure_handler = Some(Box::new(handler));
        self
    }

    /// Abort the process after a critical failure (default off; opt-in
    /// escalation, never a library default).
    pub fn panic_on_failure(mut self, panic: bool) -> Self {
        self.panic_on_failure = panic;
        self
    }

    /// Replication queue capacity per backend (batches).
    pub fn replication_queue(mut self, capacity: usize) -> Self {
        self.replication_queue = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(SinkError::ConfigInvalid { reason });

        if self.wal_path.is_none() {
            return invalid("wal_path is required".to_string());
        }
        if self.wal_options.max_segment_bytes < (RECORD_OVERHEAD as u64) * 2 {
            return invalid(format!(
                "max_segment_bytes {} cannot hold even two empty records",
                self.wal_options.max_segment_bytes
            ));
        }
        if self.wal_options.max_segment_age.is_zero() {
            return invalid("max_segment_age must be positive".to_string());
        }
        match &self.commit {
            CommitMode::Mutex(config) => {
                if config.batch_size == 0 {
                    return invalid("batch_size must be positive".to_string());
                }
                if config.max_delay.is_zero() {
                    return invalid("max_delay must be positive".to_string());
                }
            }
            CommitMode::LockFree(config) => {
                if config.capacity == 0 {
                    return invalid("ring_capacity must be positive".to_string());
                }
            }
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return invalid(format!("retry.jitter {} outside [0, 1]", self.retry.jitter));
        }
        if self.breaker.max_failures == 0 {
            return invalid("breaker.max_failures must be positive".to_string());
        }
        if let Some(settings) = &self.compliance {
            if let Some(days) = settings.retention_days {
                // Validates bounds; the profile itself is rebuilt in build().
                settings.profile.clone().with_retention_days(days)?;
            }
        }
        Ok(())
    }

    /// Validates every knob and opens the sink.
    pub fn build(self) -> Result<AuditSink> {
        self.validate()?;
        AuditSink::from_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_wal_path_is_rejected() {
        let err = SinkBuilder::default().build().unwrap_err();
        assert!(matches!(err, SinkError::ConfigInvalid { .. }));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = SinkBuilder::default()
            .wal_path("/tmp/nowhere")
            .group_commit(0, Duration::from_millis(10))
            .build()
            .unwrap_err();
        assert!(matches!(err, SinkError::ConfigInvalid { .. }));
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let err = SinkBuilder::default()
            .wal_path("/tmp/nowhere")
            .profile(ComplianceProfile::hipaa())
            .encryption_key(&[0u8; 16])
            .unwrap_err();
        assert!(matches!(err, SinkError::ConfigInvalid { .. }));
    }

    #[test]
    fn encryption_key_without_profile_is_rejected() {
        let err = SinkBuilder::default()
            .wal_path("/tmp/nowhere")
            .encryption_key(&[0u8; 32])
            .unwrap_err();
        assert!(matches!(err, SinkError::ConfigInvalid { .. }));
    }

    #[test]
    fn out_of_bounds_retention_fails_validation() {
        let err = SinkBuilder::default()
            .wal_path("/tmp/nowhere")
            .profile(ComplianceProfile::hipaa())
            .retention_days(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("2190"));
    }
}
