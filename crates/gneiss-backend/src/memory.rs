//! In-memory backend test double.
//!
//! Stores events in a vector and fails on request, so retry, breaker, and
//! replication behavior can be exercised without a real store.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use gneiss_types::LogEvent;

use crate::backend::{Backend, BackendIntegrityReport};
use crate::error::{BackendError, Result};

/// Scriptable in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    name: String,
    events: Mutex<Vec<LogEvent>>,
    /// Fail this many upcoming write calls with a retryable error.
    fail_next: AtomicU32,
    /// Fail every write call with a retryable error.
    fail_always: AtomicBool,
    write_calls: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Makes the next `n` write calls fail with a retryable error.
    pub fn fail_times(&self, n: u32) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    /// Makes every write call fail until cleared.
    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::Relaxed);
    }

    /// Events successfully written.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("memory backend poisoned").clone()
    }

    /// Write calls attempted (including failed ones).
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }

    fn maybe_fail(&self, op: &'static str) -> Result<()> {
        if self.fail_always.load(Ordering::Relaxed) {
            return Err(BackendError::Operation {
                backend: self.name.clone(),
                op,
                cause: "scripted failure".to_string(),
                retryable: true,
            });
        }
        let remaining = self.fail_next.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::Relaxed);
            return Err(BackendError::Operation {
                backend: self.name.clone(),
                op,
                cause: "scripted transient failure".to_string(),
                retryable: true,
            });
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_batch(&self, events: &[LogEvent]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        self.maybe_fail("write_batch")?;
        self.events
            .lock()
            .expect("memory backend poisoned")
            .extend_from_slice(events);
        Ok(())
    }

    fn read_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<LogEvent>> {
        Ok(self
            .events()
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect())
    }

    fn verify_integrity(&self) -> Result<BackendIntegrityReport> {
        let mut report = BackendIntegrityReport::new(self.name.clone());
        report.objects_checked = 1;
        report.events_decoded = self.events().len() as u64;
        Ok(report)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gneiss_types::Level;

    #[test]
    fn scripted_failures_then_success() {
        let backend = MemoryBackend::new("mock");
        backend.fail_times(2);
        let event = LogEvent::new(Level::Information, "x");

        assert!(backend.write(&event).is_err());
        assert!(backend.write(&event).is_err());
        assert!(backend.write(&event).is_ok());
        assert_eq!(backend.write_calls(), 3);
        assert_eq!(backend.events().len(), 1);
    }
}
