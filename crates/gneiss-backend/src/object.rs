//! Generic object-store backend shape.
//!
//! Every cloud archive target (S3, Azure Blob, GCS) follows the same
//! pattern: buffer a batch, serialize line-delimited JSON (optionally gzip),
//! compute a content hash, upload with provider metadata, retry on
//! transient failures, and remember the hash for later integrity
//! round-trips. That shape lives here, generic over an [`ObjectStore`];
//! the provider SDK call itself is the embedder's three-method problem.
//!
//! The cross-backend content hash is SHA-256 (hex), matching the hash family
//! the WAL already uses.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use gneiss_resilience::{ResilienceError, ResilienceManager};
use gneiss_types::LogEvent;
use sha2::{Digest, Sha256};

use crate::backend::{Backend, BackendIntegrityReport};
use crate::error::{BackendError, Result};

/// Provider error, classified for the retry layer.
#[derive(Debug, thiserror::Error)]
#[error("{provider} {op} failed: {message}")]
pub struct ObjectStoreError {
    pub provider: &'static str,
    pub op: &'static str,
    pub message: String,
    /// Throttling and network failures retry; auth/config failures do not.
    pub retryable: bool,
}

/// Metadata attached to every uploaded object.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    /// Hex SHA-256 of the object body as uploaded.
    pub content_hash: String,
    /// Provider-specific encryption setting (e.g. "aws:kms").
    pub encryption: Option<String>,
    /// Provider storage class/tier.
    pub storage_class: Option<String>,
    /// Request store-side immutability.
    pub object_lock: bool,
    /// Store-side retention, days.
    pub retention_days: Option<u32>,
}

/// The three provider calls a cloud backend actually needs.
pub trait ObjectStore: Send + Sync {
    /// Provider name for metrics and breaker registration ("s3", "azure", "gcs").
    fn provider(&self) -> &'static str;

    /// Uploads one object.
    fn put(&self, key: &str, body: &[u8], metadata: &ObjectMetadata)
        -> std::result::Result<(), ObjectStoreError>;

    /// Downloads one object for integrity verification.
    fn get(&self, key: &str) -> std::result::Result<Vec<u8>, ObjectStoreError>;
}

/// Upload batching configuration.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Key prefix for uploaded objects.
    pub prefix: String,
    /// Events buffered before an upload.
    pub batch_size: usize,
    /// Gzip object bodies.
    pub compress: bool,
    pub encryption: Option<String>,
    pub storage_class: Option<String>,
    pub object_lock: bool,
    pub retention_days: Option<u32>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            prefix: "audit/".to_string(),
            batch_size: 100,
            compress: true,
            encryption: None,
            storage_class: None,
            object_lock: false,
            retention_days: None,
        }
    }
}

struct ObjectState {
    buffer: Vec<LogEvent>,
    /// key → hex SHA-256 of the uploaded body.
    uploaded: HashMap<String, String>,
    next_object: u64,
}

/// Buffering, hashing, retrying archive backend over any [`ObjectStore`].
pub struct ObjectStoreBackend<S: ObjectStore> {
    store: S,
    name: String,
    config: ObjectStoreConfig,
    resilience: Arc<ResilienceManager>,
    state: Mutex<ObjectState>,
    closed: AtomicBool,
}

impl<S: ObjectStore> std::fmt::Debug for ObjectStoreBackend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Counts the event lines in an object body, gunzipping first when the key
/// says so.
fn decode_event_count(key: &str, body: &[u8]) -> Result<u64> {
    let text = if key.ends_with(".gz") {
        let mut decoded = Vec::new();
        std::io::Read::read_to_end(
            &mut flate2::read::GzDecoder::new(body),
            &mut decoded,
        )?;
        decoded
    } else {
        body.to_vec()
    };
    Ok(text.iter().filter(|&&b| b == b'\n').count() as u64)
}

impl<S: ObjectStore> ObjectStoreBackend<S> {
    pub fn new(store: S, config: ObjectStoreConfig, resilience: Arc<ResilienceManager>) -> Self {
        let name = store.provider().to_string();
        Self {
            store,
            name,
            config,
            resilience,
            state: Mutex::new(ObjectState {
                buffer: Vec::new(),
                uploaded: HashMap::new(),
                next_object: 1,
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ObjectState> {
        self.state.lock().expect("object state mutex poisoned")
    }

    /// Serializes and uploads the buffered events as one object.
    fn upload_buffer(&self, state: &mut ObjectState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        let mut body = Vec::with_capacity(state.buffer.len() * 256);
        for event in &state.buffer {
            serde_json::to_writer(&mut body, event)?;
            body.push(b'\n');
        }
        let (body, extension) = if self.config.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            (encoder.finish()?, "json.gz")
        } else {
            (body, "json")
        };

        let object_number = state.next_object;
        let key = format!("{}{:08}.{extension}", self.config.prefix, object_number);
        let metadata = ObjectMetadata {
            content_hash: hex_sha256(&body),
            encryption: self.config.encryption.clone(),
            storage_class: self.config.storage_class.clone(),
            object_lock: self.config.object_lock,
            retention_days: self.config.retention_days,
        };

        let outcome = self.resilience.execute_with_breaker(&self.name, |_| {
            self.store
                .put(&key, &body, &metadata)
                .map_err(|err| BackendError::Operation {
                    backend: self.name.clone(),
                    op: err.op,
                    cause: err.message.clone(),
                    retryable: err.retryable,
                })
        });

        match outcome {
            Ok(()) => {
                state.uploaded.insert(key, metadata.content_hash);
                state.next_object = object_number + 1;
                state.buffer.clear();
                Ok(())
            }
            Err(ResilienceError::CircuitOpen { name }) => Err(BackendError::Operation {
                backend: self.name.clone(),
                op: "put",
                cause: format!("circuit breaker '{name}' open"),
                retryable: true,
            }),
            Err(ResilienceError::RetryExhausted { source, .. })
            | Err(ResilienceError::Permanent(source)) => Err(source),
            Err(ResilienceError::Cancelled) => Err(BackendError::Operation {
                backend: self.name.clone(),
                op: "put",
                cause: "cancelled".to_string(),
                retryable: false,
            }),
            Err(ResilienceError::DeadlineExceeded) => Err(BackendError::Operation {
                backend: self.name.clone(),
                op: "put",
                cause: "deadline exceeded".to_string(),
                retryable: false,
            }),
        }
    }

    /// Keys uploaded so far with their content hashes.
    pub fn uploaded_objects(&self) -> HashMap<String, String> {
        self.lock_state().uploaded.clone()
    }
}

impl<S: ObjectStore> Backend for ObjectStoreBackend<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_batch(&self, events: &[LogEvent]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        let mut state = self.lock_state();
        state.buffer.extend_from_slice(events);
        if state.buffer.len() >= self.config.batch_size {
            self.upload_buffer(&mut state)?;
        }
        Ok(())
    }

    fn read_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<LogEvent>> {
        // Audit archives on object stores are write-mostly; range scans are
        // the filesystem backend's job.
        Err(BackendError::Unsupported {
            backend: self.name.clone(),
            op: "read_range",
        })
    }

    fn verify_integrity(&self) -> Result<BackendIntegrityReport> {
        let uploaded = self.uploaded_objects();
        let mut report = BackendIntegrityReport::new(self.name.clone());

        for (key, expected_hash) in &uploaded {
            report.objects_checked += 1;
            match self.store.get(key) {
                Ok(body) => {
                    let actual = hex_sha256(&body);
                    if &actual == expected_hash {
                        match decode_event_count(key, &body) {
                            Ok(count) => report.events_decoded += count,
                            Err(err) => report.fail(format!("{key}: {err}")),
                        }
                    } else {
                        report.fail(format!(
                            "{key}: content hash mismatch (expected {expected_hash}, got {actual})"
                        ));
                    }
                }
                Err(err) => report.fail(format!("{key}: {err}")),
            }
        }
        Ok(report)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.upload_buffer(&mut state)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.lock_state();
        self.upload_buffer(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gneiss_resilience::{BreakerConfig, RetryPolicy};
    use gneiss_types::Level;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// In-memory store that can fail its first N puts.
    struct FlakyStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        failures_remaining: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                failures_remaining: AtomicU32::new(failures),
            }
        }
    }

    impl ObjectStore for FlakyStore {
        fn provider(&self) -> &'static str {
            "s3"
        }

        fn put(
            &self,
            key: &str,
            body: &[u8],
            metadata: &ObjectMetadata,
        ) -> std::result::Result<(), ObjectStoreError> {
            assert!(!metadata.content_hash.is_empty());
            let remaining = self.failures_remaining.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
                return Err(ObjectStoreError {
                    provider: "s3",
                    op: "put",
                    message: "503 slow down".to_string(),
                    retryable: true,
                });
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), body.to_vec());
            Ok(())
        }

        fn get(&self, key: &str) -> std::result::Result<Vec<u8>, ObjectStoreError> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| ObjectStoreError {
                    provider: "s3",
                    op: "get",
                    message: format!("no such key {key}"),
                    retryable: false,
                })
        }
    }

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

    fn events(n: usize) -> Vec<LogEvent> {
        (0..n)
            .map(|i| LogEvent::new(Level::Information, format!("event {i}")))
            .collect()
    }

    #[test]
    fn batches_upload_with_hash_bookkeeping() {
        let backend = ObjectStoreBackend::new(
            FlakyStore::new(0),
            ObjectStoreConfig {
                batch_size: 10,
                compress: false,
                ..ObjectStoreConfig::default()
            },
            fast_resilience(),
        );

        backend.write_batch(&events(10)).unwrap();
        assert_eq!(backend.uploaded_objects().len(), 1);
        assert!(backend.uploaded_objects().contains_key("audit/00000001.json"));

        let report = backend.verify_integrity().unwrap();
        assert!(report.valid);
        assert_eq!(report.objects_checked, 1);
        assert_eq!(report.events_decoded, 10);
    }

    #[test]
    fn transient_failures_are_retried_through_the_breaker() {
        let backend = ObjectStoreBackend::new(
            FlakyStore::new(2),
            ObjectStoreConfig {
                batch_size: 1,
                compress: true,
                ..ObjectStoreConfig::default()
            },
            fast_resilience(),
        );

        // First two puts fail with a retryable error; the third succeeds.
        backend.write_batch(&events(1)).unwrap();
        assert_eq!(backend.uploaded_objects().len(), 1);

        let stats = backend.resilience.retry_stats();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successful_retries, 1);
    }

    #[test]
    fn flush_uploads_partial_buffers() {
        let backend = ObjectStoreBackend::new(
            FlakyStore::new(0),
            ObjectStoreConfig {
                batch_size: 100,
                compress: false,
                ..ObjectStoreConfig::default()
            },
            fast_resilience(),
        );

        backend.write_batch(&events(3)).unwrap();
        assert!(backend.uploaded_objects().is_empty(), "still buffered");
        backend.flush().unwrap();
        assert_eq!(backend.uploaded_objects().len(), 1);
    }

    #[test]
    fn tampered_object_fails_verification() {
        let store = FlakyStore::new(0);
        let backend = ObjectStoreBackend::new(
            store,
            ObjectStoreConfig {
                batch_size: 1,
                compress: false,
                ..ObjectStoreConfig::default()
            },
            fast_resilience(),
        );
        backend.write_batch(&events(1)).unwrap();

        // Tamper with the stored object behind the backend's back.
        {
            let mut objects = backend.store.objects.lock().unwrap();
            let body = objects.get_mut("audit/00000001.json").unwrap();
            body[0] ^= 0xFF;
        }

        let report = backend.verify_integrity().unwrap();
        assert!(!report.valid);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("hash mismatch"));
    }

    #[test]
    fn read_range_is_unsupported() {
        let backend = ObjectStoreBackend::new(
            FlakyStore::new(0),
            ObjectStoreConfig::default(),
            fast_resilience(),
        );
        let err = backend
            .read_range(Utc::now(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported { .. }));
    }
}
