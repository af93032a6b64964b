//! Asynchronous per-backend replication worker.
//!
//! Each backend gets one replicator: an owned worker thread draining a
//! bounded queue, pushing batches through the resilience layer. The write
//! path only ever *offers* events, so a slow or dead backend can delay or
//! drop replication, never an `emit`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use gneiss_resilience::ResilienceManager;
use gneiss_types::{LogEvent, MetricsRecorder};

use crate::backend::Backend;

/// Default bounded queue capacity (batches, not events).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

enum Command {
    Replicate(Vec<LogEvent>),
    Shutdown,
}

/// Owned replication worker for one backend.
pub struct Replicator {
    name: String,
    tx: mpsc::SyncSender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
    dropped_batches: Arc<AtomicU64>,
    failed_batches: Arc<AtomicU64>,
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("backend", &self.name)
            .finish_non_exhaustive()
    }
}

impl Replicator {
    /// Spawns the worker for `backend`.
    pub fn spawn(
        backend: Arc<dyn Backend>,
        resilience: Arc<ResilienceManager>,
        recorder: Arc<dyn MetricsRecorder>,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(queue_capacity.max(1));
        let name = backend.name().to_string();
        let failed_batches = Arc::new(AtomicU64::new(0));

        let handle = {
            let failed = Arc::clone(&failed_batches);
            let thread_name = format!("gneiss-replicate-{name}");
            std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(&backend, &resilience, &recorder, &rx, &failed))
                .expect("failed to spawn replicator thread")
        };

        Self {
            name,
            tx,
            handle: Mutex::new(Some(handle)),
            dropped_batches: Arc::new(AtomicU64::new(0)),
            failed_batches,
        }
    }

    /// Backend this replicator feeds.
    pub fn backend_name(&self) -> &str {
        &self.name
    }

    /// Offers a batch for replication without blocking.
    ///
    /// A full queue drops the batch (counted and logged): the WAL is the
    /// durability story, replication is redundancy.
    pub fn offer(&self, events: Vec<LogEvent>) {
        if events.is_empty() {
            return;
        }
        if self.tx.try_send(Command::Replicate(events)).is_err() {
            self.dropped_batches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(backend = %self.name, "replication queue full, batch dropped");
        }
    }

    /// Batches dropped because the queue was full.
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }

    /// Batches whose replication failed after retries.
    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    /// Drains the queue, flushes and closes the backend, joins the worker.
    pub fn close(&self) {
        // A full queue here means the shutdown command cannot be enqueued;
        // blocking send is correct because the worker is still draining.
        if self.tx.send(Command::Shutdown).is_err() {
            // Worker already gone.
        }
        if let Some(handle) = self.handle.lock().expect("replicator mutex poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(
    backend: &Arc<dyn Backend>,
    resilience: &Arc<ResilienceManager>,
    recorder: &Arc<dyn MetricsRecorder>,
    rx: &mpsc::Receiver<Command>,
    failed: &AtomicU64,
) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Replicate(events) => {
                let started = Instant::now();
                let outcome = resilience
                    .execute_with_breaker(backend.name(), |_| backend.write_batch(&events));
                let status = if outcome.is_ok() { "ok" } else { "error" };

                recorder.counter(
                    "backend_operations_total",
                    &[("backend", backend.name()), ("op", "write_batch"), ("status", status)],
                    1,
                );
                recorder.histogram(
                    "backend_latency_seconds",
                    &[("backend", backend.name()), ("op", "write_batch")],
                    started.elapsed().as_secs_f64(),
                );

                if let Err(err) = outcome {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        backend = %backend.name(),
                        events = events.len(),
                        error = %err,
                        "replication batch failed"
                    );
                }
            }
            Command::Shutdown => break,
        }
    }

    if let Err(err) = backend.flush().and_then(|()| backend.close()) {
        tracing::error!(backend = %backend.name(), error = %err, "backend close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use gneiss_resilience::{BreakerConfig, RetryPolicy};
    use gneiss_types::{Level, NoopRecorder};
    use std::time::Duration;

    fn fast_resilience() -> Arc<ResilienceManager> {
        Arc::new(ResilienceManager::new(
            RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(5),
                2.0,
                0.0,
            ),
            BreakerConfig::default(),
        ))
    }

    #[test]
    fn replicates_offered_batches() {
        let backend = Arc::new(MemoryBackend::new("mock"));
        let replicator = Replicator::spawn(
            Arc::clone(&backend) as Arc<dyn Backend>,
            fast_resilience(),
            Arc::new(NoopRecorder),
            16,
        );

        replicator.offer(vec![
            LogEvent::new(Level::Information, "a"),
            LogEvent::new(Level::Information, "b"),
        ]);
        replicator.close();

        assert_eq!(backend.events().len(), 2);
        assert_eq!(replicator.failed_batches(), 0);
    }

    #[test]
    fn transient_backend_failures_are_retried() {
        let backend = Arc::new(MemoryBackend::new("mock"));
        backend.fail_times(2);
        let replicator = Replicator::spawn(
            Arc::clone(&backend) as Arc<dyn Backend>,
            fast_resilience(),
            Arc::new(NoopRecorder),
            16,
        );

        replicator.offer(vec![LogEvent::new(Level::Information, "x")]);
        replicator.close();

        assert_eq!(backend.events().len(), 1);
        assert_eq!(backend.write_calls(), 3);
        assert_eq!(replicator.failed_batches(), 0);
    }

    #[test]
    fn persistent_failures_never_propagate() {
        let backend = Arc::new(MemoryBackend::new("mock"));
        backend.fail_always(true);
        let replicator = Replicator::spawn(
            Arc::clone(&backend) as Arc<dyn Backend>,
            fast_resilience(),
            Arc::new(NoopRecorder),
            16,
        );

        // offer never fails, whatever the backend does.
        replicator.offer(vec![LogEvent::new(Level::Information, "x")]);
        replicator.close();

        assert_eq!(backend.events().len(), 0);
        assert_eq!(replicator.failed_batches(), 1);
    }
}
