//! Storage backend abstraction for quadmap
//!
//! The tiler treats persistent storage as a set of named collections of
//! records keyed by a `u64` index, queried by key list or key range. This
//! module defines that contract; typed views over it live in
//! [`crate::collections`].

use crate::error::Result;
use bytes::Bytes;
use std::ops::Range;

mod memory;
#[cfg(feature = "snapshot")]
pub mod snapshot;

pub use memory::MemoryBackend;
#[cfg(feature = "snapshot")]
pub use snapshot::{SnapshotBackend, SnapshotFile};

/// A single persisted record: primary key plus encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: u64,
    pub value: Bytes,
}

impl StoredRecord {
    pub fn new(key: u64, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Trait for storage backend implementations
///
/// Writes become durable only after [`StorageBackend::flush`]. Queries see
/// every inserted record, flushed or not.
pub trait StorageBackend: Send + Sync {
    /// Check whether a collection exists
    fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create an empty collection; creating an existing one is a no-op
    fn create_collection(&mut self, name: &str) -> Result<()>;

    /// Drop a collection and everything in it; dropping a missing one is a no-op
    fn drop_collection(&mut self, name: &str) -> Result<()>;

    /// Names of all collections, sorted
    fn list_collections(&self) -> Result<Vec<String>>;

    /// Number of records in a collection
    fn num_entities(&self, name: &str) -> Result<usize>;

    /// Insert or overwrite records
    fn insert(&mut self, name: &str, records: &[StoredRecord]) -> Result<()>;

    /// Fetch the records whose keys are listed; missing keys are skipped.
    /// Requests larger than [`StorageBackend::search_limit`] are rejected.
    fn query(&self, name: &str, keys: &[u64]) -> Result<Vec<StoredRecord>>;

    /// Fetch all records with keys in `range`, in key order
    fn query_range(&self, name: &str, range: Range<u64>) -> Result<Vec<StoredRecord>>;

    /// Make pending writes of a collection durable
    fn flush(&mut self, name: &str) -> Result<()>;

    /// Maximum number of keys accepted by one [`StorageBackend::query`]
    fn search_limit(&self) -> usize;

    /// Get storage statistics
    fn stats(&self) -> Result<StorageStats>;
}

/// Storage backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of collections
    pub collection_count: usize,
    /// Total number of records across collections
    pub record_count: usize,
    /// Payload size in bytes (approximate)
    pub size_bytes: usize,
    /// Number of insert/query/flush requests served
    pub operations_count: u64,
}
