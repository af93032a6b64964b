//! Resilience error types.

/// How an operation error should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; retry with backoff.
    Retryable,
    /// Will not succeed on retry; fail immediately.
    Permanent,
    /// The caller gave up; never retried.
    Cancelled,
}

/// Implemented by operation errors so the retry loop can classify them.
pub trait RetryableError {
    fn retry_class(&self) -> RetryClass;
}

/// Errors produced by the retry/breaker layer, wrapping the operation's own
/// error type `E`.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E: std::error::Error + 'static> {
    /// The named breaker blocked the call without invoking the operation.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// Every attempt failed; carries the last underlying error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// A non-retryable error, passed through on the first failure.
    #[error(transparent)]
    Permanent(E),

    /// The operation was cancelled (before an attempt or during a backoff
    /// sleep).
    #[error("operation cancelled")]
    Cancelled,

    /// The deadline expired before the operation could complete.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T, E> = std::result::Result<T, ResilienceError<E>>;
