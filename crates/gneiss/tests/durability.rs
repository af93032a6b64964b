//! End-to-end durability scenarios: emit, crash, recover, verify.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use gneiss::{AuditSink, EmitAck, Level, LogEvent, MemoryRecorder};

fn info_event(template: &str) -> LogEvent {
    LogEvent::new(Level::Information, template.to_string())
}

#[test]
fn basic_durability_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let wal_dir = dir.path().join("w");

    {
        let sink = AuditSink::builder().wal_path(&wal_dir).build().unwrap();
        let event = LogEvent::at(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Level::Information,
            "hello",
        );
        let ack = sink.emit(&event).unwrap();
        assert_eq!(ack, EmitAck::Durable { sequence: 1 });
        sink.close().unwrap();
    }

    let sink = AuditSink::builder().wal_path(&wal_dir).build().unwrap();
    let report = sink.verify_integrity().unwrap();
    assert!(report.valid());
    assert_eq!(report.wal.total_records, 1);
    assert_eq!(report.wal.last_sequence, 1);

    let records = sink.read_records(1, 1).unwrap();
    assert_eq!(records.len(), 1);
    let payload: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(payload["messageTemplate"], "hello");
    // RFC3339; trailing zero nanoseconds are trimmed, as in the Go
    // time.RFC3339Nano convention this wire format follows.
    assert_eq!(payload["timestamp"], "2024-01-01T00:00:00Z");
}

#[test]
fn acknowledged_events_survive_a_torn_write() {
    let dir = tempfile::tempdir().unwrap();
    let wal_dir = dir.path().join("w");
    let mut acked = 0u64;

    {
        let sink = AuditSink::builder()
            .wal_path(&wal_dir)
            .group_commit(100, Duration::from_millis(10))
            .build()
            .unwrap();
        for i in 0..1_000 {
            sink.emit(&info_event(&format!("event-{i}"))).unwrap();
            acked += 1;
        }
        sink.close().unwrap();
    }
    assert_eq!(acked, 1_000);

    // Simulate a crash mid-append: half a record's worth of garbage lands
    // after the last acknowledged record.
    let last_segment = std::fs::read_dir(&wal_dir)
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
        .max()
        .unwrap();
    let mut raw = std::fs::read(&last_segment).unwrap();
    raw.extend_from_slice(&[0x47, 0x57, 0x41, 0x4C, 0x01, 0x00, 0x13, 0x37]);
    std::fs::write(&last_segment, &raw).unwrap();

    let sink = AuditSink::builder()
        .wal_path(&wal_dir)
        .repair_on_open(true)
        .build()
        .unwrap();
    assert!(sink.recovery_info().truncated_bytes > 0);

    let report = sink.verify_integrity().unwrap();
    assert!(report.valid(), "wal report: {:?}", report.wal);
    assert!(report.wal.total_records >= acked);
    assert!(report.wal.chain_valid);
}

#[test]
fn concurrent_producers_all_land_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(
        AuditSink::builder()
            .wal_path(dir.path().join("w"))
            .group_commit(16, Duration::from_millis(2))
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for producer in 0..4u32 {
        let sink = Arc::clone(&sink);
        handles.push(std::thread::spawn(move || {
            let mut sequences = Vec::new();
            for i in 0..50u32 {
                match sink.emit(&info_event(&format!("p{producer}-{i}"))).unwrap() {
                    EmitAck::Durable { sequence } => sequences.push(sequence),
                    EmitAck::Enqueued => unreachable!("mutex committer always acks"),
                }
            }
            sequences
        }));
    }

    for handle in handles {
        let sequences = handle.join().unwrap();
        assert!(
            sequences.windows(2).all(|w| w[0] < w[1]),
            "per-producer order violated: {sequences:?}"
        );
    }

    let report = sink.verify_integrity().unwrap();
    assert!(report.valid());
    assert_eq!(report.wal.total_records, 200);
    sink.close().unwrap();
}

#[test]
fn lock_free_sink_confirms_durability_at_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let wal_dir = dir.path().join("w");

    {
        let sink = AuditSink::builder()
            .wal_path(&wal_dir)
            .lock_free_commit(10_000)
            .build()
            .unwrap();
        for i in 0..200 {
            let ack = sink.emit(&info_event(&format!("event-{i}"))).unwrap();
            assert_eq!(ack, EmitAck::Enqueued);
        }
        sink.close().unwrap();
    }

    let sink = AuditSink::builder().wal_path(&wal_dir).build().unwrap();
    let report = sink.verify_integrity().unwrap();
    assert!(report.valid());
    assert_eq!(report.wal.total_records, 200);
}

#[test]
fn metrics_flow_through_the_injected_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(MemoryRecorder::new());
    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .metrics_recorder(recorder.clone())
        .build()
        .unwrap();

    for i in 0..5 {
        sink.emit(&info_event(&format!("event-{i}"))).unwrap();
    }
    sink.close().unwrap();

    assert_eq!(recorder.counter_total("events_total"), 5);
    assert!(recorder
        .samples()
        .iter()
        .any(|s| s.name == "write_duration_seconds"));
}

#[test]
fn emit_after_close_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .build()
        .unwrap();
    sink.close().unwrap();
    assert!(matches!(
        sink.emit(&info_event("late")).unwrap_err(),
        gneiss::SinkError::Closed
    ));
}

#[test]
fn committer_stats_expose_flush_behavior() {
    let dir = tempfile::tempdir().unwrap();
    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .group_commit(1_000, Duration::from_millis(5))
        .build()
        .unwrap();

    sink.emit(&info_event("solo")).unwrap();
    let stats = sink.stats();
    assert_eq!(stats.committer.event_count, 1);
    assert_eq!(stats.committer.timer_flushes, 1);
    sink.close().unwrap();
}
