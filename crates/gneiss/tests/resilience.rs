//! End-to-end replication resilience: retries, breakers, and the rule that
//! backend trouble never fails an emit.

use std::sync::Arc;
use std::time::Duration;

use gneiss::{
    AuditSink, Backend, BreakerConfig, Level, LogEvent, MemoryBackend, RetryPolicy,
};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
        0.1,
    )
}

#[test]
fn transient_backend_failures_recover_via_retry() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new("mock"));
    backend.fail_times(2);

    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .backend(Arc::clone(&backend) as Arc<dyn Backend>)
        .retry_policy(fast_retry())
        .build()
        .unwrap();

    sink.emit(&LogEvent::new(Level::Information, "replicated")).unwrap();
    sink.close().unwrap();

    // The first two write calls failed, the third landed the batch.
    assert_eq!(backend.events().len(), 1);
    assert_eq!(backend.write_calls(), 3);

    let stats = sink.stats();
    assert_eq!(stats.retry.total_attempts, 3);
    assert_eq!(stats.retry.successful_retries, 1);
    assert_eq!(stats.replication_failed_batches, 0);
}

#[test]
fn dead_backend_trips_breaker_and_never_fails_emit() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new("mock"));
    backend.fail_always(true);

    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .backend(Arc::clone(&backend) as Arc<dyn Backend>)
        .retry_policy(fast_retry())
        .breaker_config(BreakerConfig {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        })
        .build()
        .unwrap();

    // Every emit succeeds regardless of the backend.
    for i in 0..8 {
        sink.emit(&LogEvent::new(Level::Information, format!("event-{i}")))
            .unwrap();
    }
    sink.close().unwrap();

    // Five exhausted batches (3 attempts each) trip the breaker; the
    // remaining batches are rejected without touching the backend.
    assert_eq!(backend.events().len(), 0);
    assert_eq!(backend.write_calls(), 5 * 3);

    let stats = sink.stats();
    assert_eq!(stats.replication_failed_batches, 8);

    // Local durability is unaffected.
    let report = sink.verify_integrity().unwrap();
    assert!(report.wal.valid);
    assert_eq!(report.wal.total_records, 8);
}

#[test]
fn healthy_backend_archives_every_event() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new("mock"));

    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .backend(Arc::clone(&backend) as Arc<dyn Backend>)
        .build()
        .unwrap();

    for i in 0..25 {
        sink.emit(&LogEvent::new(Level::Information, format!("event-{i}")))
            .unwrap();
    }
    sink.close().unwrap();

    assert_eq!(backend.events().len(), 25);
    let report = sink.verify_integrity().unwrap();
    assert!(report.valid());
    assert_eq!(report.backends.len(), 1);
    assert_eq!(report.backends[0].events_decoded, 25);
}
