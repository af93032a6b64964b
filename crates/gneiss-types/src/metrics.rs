//! Injected metrics seam.
//!
//! The core never talks to a process-wide metric registry. Components accept
//! an `Arc<dyn MetricsRecorder>` and report name/labels/value triples; the
//! embedding application decides what (if anything) to do with them.

use std::sync::Mutex;

/// A single label pair attached to a metric emission.
pub type Label<'a> = (&'static str, &'a str);

/// Receiver for metric emissions from the sink's components.
///
/// Implementations must be cheap and non-blocking: emissions happen on the
/// write path. All methods have no-op defaults so implementors can pick the
/// signals they care about.
pub trait MetricsRecorder: Send + Sync {
    /// Increments a monotonic counter.
    fn counter(&self, _name: &'static str, _labels: &[Label<'_>], _value: u64) {}

    /// Sets a point-in-time gauge.
    fn gauge(&self, _name: &'static str, _labels: &[Label<'_>], _value: f64) {}

    /// Records one observation of a distribution (latency, size).
    fn histogram(&self, _name: &'static str, _labels: &[Label<'_>], _value: f64) {}
}

/// Discards every emission. The default when no recorder is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {}

/// One captured emission, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

/// Captures emissions in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    samples: Mutex<Vec<MetricSample>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of everything recorded so far.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().expect("metrics mutex poisoned").clone()
    }

    /// Sum of all counter increments recorded under `name`.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.samples()
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.value as u64)
            .sum()
    }

    fn push(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        let labels = labels.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
        self.samples
            .lock()
            .expect("metrics mutex poisoned")
            .push(MetricSample { name, labels, value });
    }
}

impl MetricsRecorder for MemoryRecorder {
    fn counter(&self, name: &'static str, labels: &[Label<'_>], value: u64) {
        self.push(name, labels, value as f64);
    }

    fn gauge(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        self.push(name, labels, value);
    }

    fn histogram(&self, name: &'static str, labels: &[Label<'_>], value: f64) {
        self.push(name, labels, value);
    }
}
