//! # gneiss-resilience: Retry and circuit breaking for backend I/O
//!
//! Replication to archive backends crosses networks that fail; this crate
//! mediates every such call:
//!
//! - [`RetryPolicy`]: exponential backoff with jitter, deadline and
//!   cancellation aware.
//! - [`CircuitBreaker`]: Closed/Open/HalfOpen with lazy recovery probing.
//! - [`ResilienceManager`]: retry-inside-named-breaker composition.
//!
//! The WAL write path never goes through this crate: local durability is
//! not retried, it either succeeds or is a `CriticalFailure`.

mod breaker;
mod error;
mod manager;
mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, StateCallback};
pub use error::{ResilienceError, Result, RetryClass, RetryableError};
pub use manager::ResilienceManager;
pub use retry::{CancelToken, RetryContext, RetryPolicy, RetryStats, RetryStatsSnapshot};
