//! Resilience manager: one retry policy plus named circuit breakers.
//!
//! Backends get a breaker each (keyed by backend name); every remote
//! operation runs as retry-inside-breaker, so a dependency that keeps
//! failing through its retries trips its breaker and subsequent calls fail
//! fast with `CircuitOpen`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gneiss_types::{MetricsRecorder, NoopRecorder};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::{ResilienceError, RetryableError};
use crate::retry::{RetryContext, RetryPolicy, RetryStatsSnapshot};

/// Combines a retry policy with a registry of named breakers.
pub struct ResilienceManager {
    retry: RetryPolicy,
    breaker_config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl std::fmt::Debug for ResilienceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceManager")
            .field("retry", &self.retry)
            .field("breaker_config", &self.breaker_config)
            .finish_non_exhaustive()
    }
}

impl ResilienceManager {
    pub fn new(retry: RetryPolicy, breaker_config: BreakerConfig) -> Self {
        Self::with_recorder(retry, breaker_config, Arc::new(NoopRecorder))
    }

    pub fn with_recorder(
        retry: RetryPolicy,
        breaker_config: BreakerConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            retry,
            breaker_config,
            breakers: Mutex::new(HashMap::new()),
            recorder,
        }
    }

    /// The shared retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Retry counter snapshot.
    pub fn retry_stats(&self) -> RetryStatsSnapshot {
        self.retry.stats()
    }

    /// Returns the named breaker, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let recorder = Arc::clone(&self.recorder);
        let breaker = Arc::new(
            CircuitBreaker::new(name, self.breaker_config.clone()).with_state_callback(Box::new(
                move |name, _from, to| {
                    recorder.gauge("circuit_breaker_state", &[("name", name)], to.as_gauge());
                },
            )),
        );
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Runs `op` with retries inside the named breaker.
    ///
    /// The breaker sees one composite outcome: success if any attempt
    /// succeeded, one failure if the retries were exhausted. `CircuitOpen`
    /// is returned without invoking `op` at all.
    pub fn execute_with_breaker<T, E>(
        &self,
        name: &str,
        op: impl FnMut(u32) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, ResilienceError<E>>
    where
        E: RetryableError + std::error::Error + 'static,
    {
        self.execute_with_breaker_ctx(name, &RetryContext::none(), op)
    }

    /// As [`Self::execute_with_breaker`], under a deadline/cancellation
    /// context.
    pub fn execute_with_breaker_ctx<T, E>(
        &self,
        name: &str,
        ctx: &RetryContext,
        op: impl FnMut(u32) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, ResilienceError<E>>
    where
        E: RetryableError + std::error::Error + 'static,
    {
        let breaker = self.breaker(name);
        if !breaker.can_execute() {
            breaker
                .rejected_calls
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(ResilienceError::CircuitOpen {
                name: name.to_string(),
            });
        }

        let result = self.retry.execute_with(ctx, op);
        let status = match &result {
            Ok(_) => {
                breaker.record_success();
                "ok"
            }
            // Cancellation says nothing about the dependency's health.
            Err(ResilienceError::Cancelled | ResilienceError::DeadlineExceeded) => "cancelled",
            Err(_) => {
                breaker.record_failure();
                "error"
            }
        };
        self.recorder.counter(
            "retry_attempts_total",
            &[("op", name), ("status", status)],
            1,
        );
        result
    }
}
