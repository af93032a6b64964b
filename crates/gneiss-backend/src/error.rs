//! Backend error types.

use gneiss_resilience::{RetryClass, RetryableError};

/// Errors from archive backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A storage operation failed.
    #[error("backend {backend} {op} failed: {cause}")]
    Operation {
        backend: String,
        op: &'static str,
        cause: String,
        /// Whether the failure looks transient (network, throttling).
        retryable: bool,
    },

    /// Local I/O failure (filesystem backend).
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The backend does not implement this operation (object stores are
    /// write-mostly; range reads may be unsupported).
    #[error("backend {backend} does not support {op}")]
    Unsupported { backend: String, op: &'static str },

    /// JSON encode/decode of an event failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend has been closed.
    #[error("backend is closed")]
    Closed,
}

impl RetryableError for BackendError {
    fn retry_class(&self) -> RetryClass {
        match self {
            BackendError::Operation { retryable, .. } => {
                if *retryable {
                    RetryClass::Retryable
                } else {
                    RetryClass::Permanent
                }
            }
            // Local disk hiccups are worth one more try; everything else is
            // a caller bug or a closed backend.
            BackendError::Io { .. } => RetryClass::Retryable,
            BackendError::Unsupported { .. }
            | BackendError::Serialization(_)
            | BackendError::Closed => RetryClass::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
