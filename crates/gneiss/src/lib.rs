//! # Gneiss
//!
//! Embeddable audit-event sink with guaranteed delivery for security- and
//! compliance-sensitive records (HIPAA, PCI-DSS, SOX, GDPR).
//!
//! Events from an in-process logging pipeline are persisted atomically to a
//! local hash-chained write-ahead log and asynchronously replicated to
//! long-term archive backends. The contract: **once [`AuditSink::emit`]
//! returns a durable ack, the event is recoverable after any process crash,
//! power loss, or torn write, and tampering with persisted data is
//! detectable.**
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           AuditSink                            │
//! │  ┌────────────┐   ┌───────────────┐   ┌────────────────────┐   │
//! │  │ Compliance │ → │ GroupCommitter│ → │  WAL (segments,    │   │
//! │  │ (mask/enc/ │   │ (one fsync    │   │  CRC + hash chain) │   │
//! │  │  sign)     │   │  per batch)   │   └────────────────────┘   │
//! │  └────────────┘   └───────────────┘                            │
//! │        └──────────── replicators → backends (fs, S3, …)        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use gneiss::{AuditSink, ComplianceProfile, Level, LogEvent};
//!
//! # fn main() -> gneiss::Result<()> {
//! let sink = AuditSink::builder()
//!     .wal_path("/var/lib/audit/wal")
//!     .profile(ComplianceProfile::hipaa())
//!     .build()?;
//!
//! let event = LogEvent::new(Level::Information, "patient chart accessed")
//!     .with_property("UserId", "dr-jones")
//!     .with_property("Action", "chart-view")
//!     .with_property("PatientId", "P-1");
//! sink.emit(&event)?;
//!
//! assert!(sink.verify_integrity()?.valid());
//! sink.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod sink;

pub use config::{CommitMode, SinkBuilder};
pub use error::{Result, SinkError};
pub use sink::{AuditSink, EmitAck, FailureHandler, SinkIntegrityReport, SinkStats};

// Re-export the event model
pub use gneiss_types::{
    Level, LogEvent, MemoryRecorder, MetricSample, MetricsRecorder, NoopRecorder, SyncMode,
};

// Re-export compliance types
pub use gneiss_compliance::{
    ComplianceEngine, ComplianceError, ComplianceProfile, ComplianceRecord, EncryptedData,
};

// Re-export crypto primitives
pub use gneiss_crypto::{
    AeadAlgorithm, ChainVerification, ChainedSignature, CryptoError, EncryptedBlob, EncryptionKey,
    KeyId, KeyManager, SignatureAlgorithm, SignatureChain, Signer, derive_key,
};

// Re-export WAL types
pub use gneiss_wal::{
    CommitterConfig, CommitterStatsSnapshot, IntegrityReport, Record, RecordFlags, RecoveryInfo,
    RingConfig, Wal, WalError, WalOptions,
};

// Re-export resilience types
pub use gneiss_resilience::{
    BreakerConfig, CancelToken, CircuitBreaker, CircuitState, ResilienceError, ResilienceManager,
    RetryClass, RetryContext, RetryPolicy, RetryableError,
};

// Re-export backend contract and implementations
pub use gneiss_backend::{
    Backend, BackendError, BackendIntegrityReport, FilesystemBackend, FilesystemConfig,
    MemoryBackend, ObjectMetadata, ObjectStore, ObjectStoreBackend, ObjectStoreConfig,
};
