//! Local filesystem archive backend.
//!
//! Events append as line-delimited JSON to `audit-YYYYMMDD-HHMMSS.json`
//! files that rotate by size or age; rotated files can be gzipped. An
//! optional shadow directory (`<path>.shadow`) mirrors every write for local
//! redundancy. Shadow failures are recorded but never fail the primary
//! write.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use gneiss_types::{LogEvent, SyncMode};

use crate::backend::{Backend, BackendIntegrityReport};
use crate::error::{BackendError, Result};

/// Default rotation size (64 MiB).
pub const DEFAULT_MAX_SIZE: u64 = 64 * 1024 * 1024;

/// Default rotation age (1 hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Filesystem backend configuration.
#[derive(Debug, Clone)]
pub struct FilesystemConfig {
    /// Archive directory.
    pub path: PathBuf,
    /// When writes reach stable storage.
    pub sync_mode: SyncMode,
    /// Size rotation trigger.
    pub max_size: u64,
    /// Age rotation trigger.
    pub max_age: Duration,
    /// Gzip files on rotation.
    pub compress: bool,
    /// Mirror writes into `<path>.shadow`.
    pub shadow: bool,
}

impl FilesystemConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_mode: SyncMode::Batch,
            max_size: DEFAULT_MAX_SIZE,
            max_age: DEFAULT_MAX_AGE,
            compress: false,
            shadow: false,
        }
    }
}

struct ActiveFile {
    file: File,
    path: PathBuf,
    size: u64,
    opened_at: Instant,
}

struct FsState {
    active: Option<ActiveFile>,
    shadow_active: Option<ActiveFile>,
    last_sync: Instant,
}

/// Rotating line-delimited JSON archive on the local filesystem.
pub struct FilesystemBackend {
    name: String,
    config: FilesystemConfig,
    shadow_dir: Option<PathBuf>,
    state: Mutex<FsState>,
    shadow_errors: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend")
            .field("path", &self.config.path)
            .field("shadow", &self.config.shadow)
            .finish_non_exhaustive()
    }
}

fn archive_file_name(now: DateTime<Utc>, discriminator: u32) -> String {
    let stamp = now.format("%Y%m%d-%H%M%S");
    if discriminator == 0 {
        format!("audit-{stamp}.json")
    } else {
        format!("audit-{stamp}-{discriminator}.json")
    }
}

fn is_archive_file(name: &str) -> bool {
    name.starts_with("audit-") && (name.ends_with(".json") || name.ends_with(".json.gz"))
}

fn open_archive_file(dir: &Path) -> Result<ActiveFile> {
    fs::create_dir_all(dir)?;
    let now = Utc::now();
    // Rotations inside one second need a discriminator to avoid reopening
    // the file (or clobbering the gzip) that was just rotated out.
    for discriminator in 0..1000 {
        let path = dir.join(archive_file_name(now, discriminator));
        let gz_path = {
            let mut os = path.as_os_str().to_owned();
            os.push(".gz");
            PathBuf::from(os)
        };
        if path.exists() || gz_path.exists() {
            continue;
        }
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        return Ok(ActiveFile {
            file,
            path,
            size: 0,
            opened_at: Instant::now(),
        });
    }
    Err(BackendError::Operation {
        backend: "filesystem".to_string(),
        op: "rotate",
        cause: "could not find a free archive file name".to_string(),
        retryable: false,
    })
}

/// Gzips `path` to `path.gz` and removes the original.
fn compress_file(path: &Path) -> Result<()> {
    let mut source = File::open(path)?;
    let gz_path = {
        let mut os = path.as_os_str().to_owned();
        os.push(".gz");
        PathBuf::from(os)
    };
    let mut encoder = GzEncoder::new(File::create(&gz_path)?, Compression::default());
    std::io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(path)?;
    Ok(())
}

impl FilesystemBackend {
    /// Opens (creating directories as needed) a filesystem backend.
    pub fn open(config: FilesystemConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        let shadow_dir = if config.shadow {
            let mut os = config.path.as_os_str().to_owned();
            os.push(".shadow");
            let dir = PathBuf::from(os);
            fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };

        Ok(Self {
            name: "filesystem".to_string(),
            config,
            shadow_dir,
            state: Mutex::new(FsState {
                active: None,
                shadow_active: None,
                last_sync: Instant::now(),
            }),
            shadow_errors: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Shadow-write failures observed so far.
    pub fn shadow_error_count(&self) -> u64 {
        self.shadow_errors.load(Ordering::Relaxed)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FsState> {
        self.state.lock().expect("filesystem state mutex poisoned")
    }

    /// Rotates `active` out (compressing if configured) and opens a fresh
    /// file in `dir`.
    fn rotate(&self, slot: &mut Option<ActiveFile>, dir: &Path) -> Result<()> {
        if let Some(active) = slot.take() {
            active.file.sync_all()?;
            let path = active.path.clone();
            drop(active);
            if self.config.compress {
                compress_file(&path)?;
            }
            tracing::info!(file = %path.display(), "rotated archive file");
        }
        *slot = Some(open_archive_file(dir)?);
        Ok(())
    }

    fn ensure_active(&self, state: &mut FsState, incoming: u64) -> Result<()> {
        let needs_rotation = state.active.as_ref().is_some_and(|active| {
            (active.size > 0 && active.size + incoming > self.config.max_size)
                || active.opened_at.elapsed() >= self.config.max_age
        });
        if state.active.is_none() || needs_rotation {
            let dir = self.config.path.clone();
            self.rotate(&mut state.active, &dir)?;
        }

        if let Some(shadow_dir) = &self.shadow_dir {
            let shadow_needs_rotation = state.shadow_active.as_ref().is_some_and(|active| {
                (active.size > 0 && active.size + incoming > self.config.max_size)
                    || active.opened_at.elapsed() >= self.config.max_age
            });
            if state.shadow_active.is_none() || shadow_needs_rotation {
                let dir = shadow_dir.clone();
                if let Err(err) = self.rotate(&mut state.shadow_active, &dir) {
                    self.shadow_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, "shadow rotation failed");
                    state.shadow_active = None;
                }
            }
        }
        Ok(())
    }

    fn sync_files(&self, state: &mut FsState) -> Result<()> {
        if let Some(active) = &state.active {
            active.file.sync_all()?;
        }
        if let Some(shadow) = &state.shadow_active {
            if let Err(err) = shadow.file.sync_all() {
                self.shadow_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "shadow fsync failed");
            }
        }
        state.last_sync = Instant::now();
        Ok(())
    }

    fn archive_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(is_archive_file)
            {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Decodes every event line in an archive file (gz-aware).
    fn decode_file(path: &Path) -> Result<Vec<LogEvent>> {
        let raw: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(flate2::read::GzDecoder::new(File::open(path)?))
        } else {
            Box::new(File::open(path)?)
        };

        let mut events = Vec::new();
        for line in BufReader::new(raw).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

impl Backend for FilesystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_batch(&self, events: &[LogEvent]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        if events.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut encoded, event)?;
            encoded.push(b'\n');
        }

        let mut state = self.lock_state();
        self.ensure_active(&mut state, encoded.len() as u64)?;

        let active = state.active.as_mut().expect("ensure_active opened a file");
        active.file.write_all(&encoded)?;
        active.size += encoded.len() as u64;

        if let Some(shadow) = state.shadow_active.as_mut() {
            if let Err(err) = shadow.file.write_all(&encoded) {
                self.shadow_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "shadow write failed");
            } else {
                shadow.size += encoded.len() as u64;
            }
        }

        match self.config.sync_mode {
            SyncMode::Immediate => self.sync_files(&mut state)?,
            SyncMode::Interval(period) if state.last_sync.elapsed() >= period => {
                self.sync_files(&mut state)?;
            }
            SyncMode::Batch | SyncMode::Interval(_) => {}
        }
        Ok(())
    }

    fn read_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<LogEvent>> {
        self.flush()?;
        let mut results = Vec::new();
        for path in Self::archive_files(&self.config.path)? {
            for event in Self::decode_file(&path)? {
                if event.timestamp >= start && event.timestamp <= end {
                    results.push(event);
                }
            }
        }
        results.sort_by_key(|e| e.timestamp);
        Ok(results)
    }

    fn verify_integrity(&self) -> Result<BackendIntegrityReport> {
        self.flush()?;
        let mut report = BackendIntegrityReport::new(self.name.clone());

        let primary = Self::archive_files(&self.config.path)?;
        for path in &primary {
            report.objects_checked += 1;
            match Self::decode_file(path) {
                Ok(events) => report.events_decoded += events.len() as u64,
                Err(err) => report.fail(format!("{}: {err}", path.display())),
            }
        }

        if let Some(shadow_dir) = &self.shadow_dir {
            let shadow = Self::archive_files(shadow_dir)?;
            if shadow.len() != primary.len() {
                report.warnings.push(format!(
                    "shadow file count {} differs from primary {}",
                    shadow.len(),
                    primary.len()
                ));
            }
        }
        if self.shadow_error_count() > 0 {
            report
                .warnings
                .push(format!("{} shadow write errors", self.shadow_error_count()));
        }
        Ok(report)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.sync_files(&mut state)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.lock_state();
        self.sync_files(&mut state)?;
        state.active = None;
        state.shadow_active = None;
        Ok(())
    }
}

impl Drop for FilesystemBackend {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "failed to close filesystem backend during drop");
        }
    }
}
