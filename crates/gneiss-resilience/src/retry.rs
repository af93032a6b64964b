//! Retry with exponential backoff and jitter.
//!
//! Delay before attempt `i+1` is `min(max_delay, initial_delay · multiplier^i)`,
//! perturbed by a uniform jitter of ±`jitter`·delay and clamped back into
//! `[initial_delay, max_delay]`. Cancellation during a backoff sleep aborts
//! immediately; deadlines are checked before every attempt and during
//! sleeps.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{ResilienceError, Result, RetryClass, RetryableError};

/// Granularity of cancellation checks during a backoff sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared between callers and retry loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; retry loops abort at their next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Retry counters. Shared by clones of one policy.
#[derive(Debug, Default)]
pub struct RetryStats {
    /// Attempts made, including first tries.
    pub total_attempts: AtomicU64,
    /// Operations that succeeded only after at least one retry.
    pub successful_retries: AtomicU64,
    /// Operations that failed every attempt.
    pub exhausted: AtomicU64,
}

/// Point-in-time copy of [`RetryStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStatsSnapshot {
    pub total_attempts: u64,
    pub successful_retries: u64,
    pub exhausted: u64,
}

/// Deadline and cancellation context for one retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl RetryContext {
    /// Context with no deadline and no cancellation.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            deadline: None,
            cancel: Some(cancel),
        }
    }

    fn check(&self) -> Option<CheckFailure> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Some(CheckFailure::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CheckFailure::DeadlineExceeded);
        }
        None
    }
}

enum CheckFailure {
    Cancelled,
    DeadlineExceeded,
}

impl CheckFailure {
    fn into_error<E: std::error::Error + 'static>(self) -> ResilienceError<E> {
        match self {
            CheckFailure::Cancelled => ResilienceError::Cancelled,
            CheckFailure::DeadlineExceeded => ResilienceError::DeadlineExceeded,
        }
    }
}

/// Exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`.
    pub jitter: f64,
    stats: Arc<RetryStats>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
            stats: Arc::new(RetryStats::default()),
        }
    }
}

impl RetryPolicy {
    /// A policy with explicit knobs and fresh stats.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
            stats: Arc::new(RetryStats::default()),
        }
    }

    /// Counter snapshot across all operations run through this policy.
    pub fn stats(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            total_attempts: self.stats.total_attempts.load(Ordering::Relaxed),
            successful_retries: self.stats.successful_retries.load(Ordering::Relaxed),
            exhausted: self.stats.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Backoff before attempt `attempt + 1` (0-based), jittered and clamped.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };

        let floor = self.initial_delay.as_secs_f64();
        Duration::from_secs_f64(jittered.clamp(floor, self.max_delay.as_secs_f64().max(floor)))
    }

    /// Runs `op` with retries. `op` receives the 1-based attempt number.
    pub fn execute<T, E>(&self, op: impl FnMut(u32) -> std::result::Result<T, E>) -> Result<T, E>
    where
        E: RetryableError + std::error::Error + 'static,
    {
        self.execute_with(&RetryContext::none(), op)
    }

    /// Runs `op` with retries under a deadline/cancellation context.
    pub fn execute_with<T, E>(
        &self,
        ctx: &RetryContext,
        mut op: impl FnMut(u32) -> std::result::Result<T, E>,
    ) -> Result<T, E>
    where
        E: RetryableError + std::error::Error + 'static,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(failure) = ctx.check() {
                return Err(failure.into_error());
            }

            self.stats.total_attempts.fetch_add(1, Ordering::Relaxed);
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        self.stats.successful_retries.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(value);
                }
                Err(err) => match err.retry_class() {
                    RetryClass::Cancelled => return Err(ResilienceError::Cancelled),
                    RetryClass::Permanent => return Err(ResilienceError::Permanent(err)),
                    RetryClass::Retryable => {
                        if attempt == self.max_attempts {
                            self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                            return Err(ResilienceError::RetryExhausted {
                                attempts: attempt,
                                source: err,
                            });
                        }
                        let delay = self.delay_for(attempt - 1);
                        tracing::debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying after transient failure"
                        );
                        if let Some(failure) = self.sleep(ctx, delay) {
                            return Err(failure.into_error());
                        }
                    }
                },
            }
        }
        unreachable!("loop returns on every branch of the final attempt")
    }

    /// Sleeps `total`, waking early on cancellation or deadline expiry.
    fn sleep(&self, ctx: &RetryContext, total: Duration) -> Option<CheckFailure> {
        let wake_at = Instant::now() + total;
        loop {
            if let Some(failure) = ctx.check() {
                return Some(failure);
            }
            let now = Instant::now();
            if now >= wake_at {
                return None;
            }
            std::thread::sleep(SLEEP_SLICE.min(wake_at - now));
        }
    }
}
