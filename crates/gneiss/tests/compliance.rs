//! End-to-end compliance scenarios: masking, tamper evidence, retention.

use std::time::Duration;

use gneiss::{
    AuditSink, ComplianceProfile, ComplianceRecord, Level, LogEvent, RecordFlags, SinkError,
};

fn patient_event() -> LogEvent {
    LogEvent::new(Level::Information, "chart accessed")
        .with_property("SSN", "123-45-6789")
        .with_property("PatientId", "P-1")
        .with_property("UserId", "dr-jones")
        .with_property("Action", "chart-view")
}

#[test]
fn hipaa_masks_ssn_and_preserves_identifiers() {
    let dir = tempfile::tempdir().unwrap();
    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .profile(ComplianceProfile::hipaa())
        .build()
        .unwrap();

    sink.emit(&patient_event()).unwrap();

    // The persisted payload never carries the literal SSN.
    let records = sink.read_records(1, 1).unwrap();
    assert_eq!(records.len(), 1);
    let raw = String::from_utf8_lossy(&records[0].payload);
    assert!(!raw.contains("123-45-6789"));
    assert!(records[0].flags.contains(RecordFlags::ENCRYPTED));
    assert!(records[0].flags.contains(RecordFlags::SIGNED));

    // Decrypt and verify through the engine: masked SSN, intact PatientId.
    let record = ComplianceRecord::from_json_bytes(&records[0].payload).unwrap();
    let engine = sink.compliance().unwrap();
    let event = engine.verify_record(&record).unwrap();
    assert_eq!(event.properties["SSN"], "12*******89");
    assert_eq!(event.properties["PatientId"], "P-1");
    assert_eq!(event.properties["_compliance_profile"], "HIPAA");

    sink.close().unwrap();
}

#[test]
fn tampering_is_detected_by_wal_and_chain() {
    let dir = tempfile::tempdir().unwrap();
    let wal_dir = dir.path().join("w");
    let sink = AuditSink::builder()
        .wal_path(&wal_dir)
        .max_segment_bytes(4 * 1024)
        .profile(ComplianceProfile::hipaa())
        .build()
        .unwrap();

    for _ in 0..10 {
        sink.emit(&patient_event()).unwrap();
    }
    sink.flush().unwrap();

    // The in-memory chain is intact.
    let chain = sink.verify_chain().unwrap();
    assert!(chain.valid);
    assert_eq!(chain.total_signatures, 10);

    // Collect stored records before tampering with the files.
    let records: Vec<ComplianceRecord> = sink
        .read_records(1, 10)
        .unwrap()
        .iter()
        .map(|r| ComplianceRecord::from_json_bytes(&r.payload).unwrap())
        .collect();

    // Flip one bit in the middle of the second segment.
    let mut segments: Vec<_> = std::fs::read_dir(&wal_dir)
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
        .collect();
    segments.sort();
    assert!(segments.len() >= 2, "expected rotation: {segments:?}");
    let target = &segments[1];
    let mut raw = std::fs::read(target).unwrap();
    let mid = raw.len() / 2;
    raw[mid] ^= 0x01;
    std::fs::write(target, &raw).unwrap();

    let report = sink.verify_integrity().unwrap();
    assert!(!report.wal.valid);
    assert_eq!(report.wal.corrupted_segments.len(), 1);
    assert_eq!(
        report.wal.corrupted_segments[0],
        target.file_name().unwrap().to_str().unwrap()
    );

    // Chain verification over stored records fails at the tampered position.
    let engine = sink.compliance().unwrap();
    let mut tampered = records;
    let mut signature = tampered[2].signature.clone().unwrap();
    signature.data_hash = [0xAB; 32];
    tampered[2].signature = Some(signature);
    let chain = engine.verify_records(&tampered).unwrap();
    assert!(!chain.valid);
    assert_eq!(chain.failed_position, Some(2));
}

#[test]
fn sox_profile_signs_without_encrypting() {
    let dir = tempfile::tempdir().unwrap();
    let sink = AuditSink::builder()
        .wal_path(dir.path().join("w"))
        .profile(ComplianceProfile::sox())
        .signer(gneiss::Signer::generate_rsa(2048).unwrap())
        .unwrap()
        .build()
        .unwrap();

    sink.emit(&patient_event()).unwrap();

    let records = sink.read_records(1, 1).unwrap();
    assert!(!records[0].flags.contains(RecordFlags::ENCRYPTED));
    assert!(records[0].flags.contains(RecordFlags::SIGNED));

    let record = ComplianceRecord::from_json_bytes(&records[0].payload).unwrap();
    assert!(record.plain_data.is_some());
    assert_eq!(
        record.signature.as_ref().unwrap().algorithm,
        "RSA-PSS-SHA256"
    );
    sink.compliance().unwrap().verify_record(&record).unwrap();
    sink.close().unwrap();
}

#[test]
fn retention_bounds_are_enforced_at_build() {
    let dir = tempfile::tempdir().unwrap();

    let err = AuditSink::builder()
        .wal_path(dir.path().join("a"))
        .profile(ComplianceProfile::hipaa())
        .retention_days(100)
        .build()
        .unwrap_err();
    assert!(matches!(err, SinkError::Compliance(_)));
    assert!(err.to_string().contains("2190"), "error was: {err}");

    let sink = AuditSink::builder()
        .wal_path(dir.path().join("b"))
        .profile(ComplianceProfile::hipaa())
        .retention_days(2555)
        .build()
        .unwrap();
    assert_eq!(
        sink.compliance().unwrap().profile().retention_period(),
        Duration::from_secs(2555 * 24 * 60 * 60)
    );
    sink.close().unwrap();
}

#[test]
fn explicit_encryption_key_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let wal_dir = dir.path().join("w");
    let key = [0x42u8; 32];

    {
        let sink = AuditSink::builder()
            .wal_path(&wal_dir)
            .profile(ComplianceProfile::gdpr())
            .encryption_key(&key)
            .unwrap()
            .build()
            .unwrap();
        sink.emit(
            &LogEvent::new(Level::Information, "profile update")
                .with_property("UserId", "u-1")
                .with_property("Action", "update")
                .with_property("LawfulBasis", "consent")
                .with_property("Email", "user@example.com"),
        )
        .unwrap();
        sink.close().unwrap();
    }

    // A fresh sink with the same key can decrypt records written before the
    // restart.
    let sink = AuditSink::builder()
        .wal_path(&wal_dir)
        .profile(ComplianceProfile::gdpr())
        .encryption_key(&key)
        .unwrap()
        .build()
        .unwrap();
    let records = sink.read_records(1, 1).unwrap();
    let record = ComplianceRecord::from_json_bytes(&records[0].payload).unwrap();
    let event = sink.compliance().unwrap().verify_record(&record).unwrap();
    assert_eq!(event.properties["LawfulBasis"], "consent");
    assert_ne!(event.properties["Email"], "user@example.com");
}
