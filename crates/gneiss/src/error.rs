//! Sink error types.

use gneiss_backend::BackendError;
use gneiss_compliance::ComplianceError;
use gneiss_wal::WalError;

/// Errors surfaced by the audit sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Bad options at construction; never retryable.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// WAL-layer failure.
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Compliance-layer failure (crypto, serialization, retention).
    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    /// Backend-layer failure (only from explicit backend operations;
    /// replication failures never propagate).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A write to the WAL itself failed: the durability contract is broken
    /// for this event. The configured failure handler has been invoked.
    #[error("critical failure: {reason}")]
    CriticalFailure { reason: String },

    /// The sink has been closed.
    #[error("audit sink is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SinkError>;
