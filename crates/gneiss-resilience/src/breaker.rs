//! Circuit breaker.
//!
//! Stops calling a failing dependency after `max_failures` consecutive
//! failures, then probes for recovery:
//!
//! ```text
//! Closed ──(max_failures consecutive failures)──▶ Open
//! Open ──(reset_timeout elapsed, next can_execute)──▶ HalfOpen
//! HalfOpen ──(half_open_max_calls consecutive successes)──▶ Closed
//! HalfOpen ──(any failure)──▶ Open
//! ```
//!
//! The Open → HalfOpen transition is lazy: nothing moves the state until a
//! caller asks `can_execute`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{ResilienceError, RetryableError};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failing fast; calls are rejected without running.
    Open,
    /// Probing: calls pass through, counting consecutive successes.
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for gauges (Closed=0, Open=1, HalfOpen=2).
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip Closed → Open.
    pub max_failures: u32,
    /// Time in Open before the next call may probe.
    pub reset_timeout: Duration,
    /// Consecutive successes that close a HalfOpen breaker.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Invoked on every state transition with `(breaker name, from, to)`.
pub type StateCallback = Box<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
}

/// A named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    on_state_change: Option<StateCallback>,
    pub total_calls: AtomicU64,
    pub total_failures: AtomicU64,
    pub rejected_calls: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
            }),
            on_state_change: None,
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    /// Attaches a transition callback.
    pub fn with_state_callback(mut self, callback: StateCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without triggering the lazy Open → HalfOpen move.
    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("breaker mutex poisoned").state
    }

    /// True when a call may proceed. Performs the lazy Open → HalfOpen
    /// transition once `reset_timeout` has elapsed since the last failure.
    pub fn can_execute(&self) -> bool {
        let transition = {
            let mut state = self.state.lock().expect("breaker mutex poisoned");
            match state.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let elapsed = state
                        .last_failure_at
                        .map_or(Duration::MAX, |at| at.elapsed());
                    if elapsed < self.config.reset_timeout {
                        return false;
                    }
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    (CircuitState::Open, CircuitState::HalfOpen)
                }
            }
        };
        self.notify(transition.0, transition.1);
        true
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let transition = {
            let mut state = self.state.lock().expect("breaker mutex poisoned");
            match state.state {
                CircuitState::Closed => {
                    state.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= self.config.half_open_max_calls {
                        state.state = CircuitState::Closed;
                        state.consecutive_failures = 0;
                        state.half_open_successes = 0;
                        Some((CircuitState::HalfOpen, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                // A success while Open (call admitted just before the trip)
                // does not move the state.
                CircuitState::Open => None,
            }
        };
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let transition = {
            let mut state = self.state.lock().expect("breaker mutex poisoned");
            state.last_failure_at = Some(Instant::now());
            match state.state {
                CircuitState::Closed => {
                    state.consecutive_failures += 1;
                    if state.consecutive_failures >= self.config.max_failures {
                        state.state = CircuitState::Open;
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    state.state = CircuitState::Open;
                    state.half_open_successes = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Open => None,
            }
        };
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    /// Runs `op` if the breaker admits it, recording the outcome.
    pub fn execute<T, E>(
        &self,
        op: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, ResilienceError<E>>
    where
        E: RetryableError + std::error::Error + 'static,
    {
        if !self.can_execute() {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            return Err(ResilienceError::CircuitOpen {
                name: self.name.clone(),
            });
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        match op() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(ResilienceError::Permanent(err))
            }
        }
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        tracing::info!(breaker = %self.name, %from, %to, "circuit breaker state change");
        if let Some(callback) = &self.on_state_change {
            callback(&self.name, from, to);
        }
    }
}
