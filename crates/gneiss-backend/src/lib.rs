//! # gneiss-backend: Long-term archive backends
//!
//! The WAL makes events durable locally; backends make them durable
//! elsewhere. This crate defines the [`Backend`] contract, the filesystem
//! implementation with shadow-copy redundancy, the generic object-store
//! shape cloud targets share, and the per-backend replication worker.
//!
//! Replication is best-effort and asynchronous by design: a backend outage
//! is logged, counted, and retried through `gneiss-resilience`, and never
//! fails an `emit`.

mod backend;
mod error;
mod filesystem;
mod memory;
mod object;
mod replicator;

pub use backend::{Backend, BackendIntegrityReport};
pub use error::{BackendError, Result};
pub use filesystem::{FilesystemBackend, FilesystemConfig, DEFAULT_MAX_AGE, DEFAULT_MAX_SIZE};
pub use memory::MemoryBackend;
pub use object::{
    ObjectMetadata, ObjectStore, ObjectStoreBackend, ObjectStoreConfig, ObjectStoreError,
};
pub use replicator::{Replicator, DEFAULT_QUEUE_CAPACITY};
