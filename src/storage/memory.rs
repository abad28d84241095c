//! In-memory storage backend implementation.

use super::{StorageBackend, StorageStats, StoredRecord};
use crate::error::{QuadmapError, Result};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_SEARCH_LIMIT: usize = 16_384;

/// In-memory storage backend: one ordered map per collection.
#[derive(Debug)]
pub struct MemoryBackend {
    collections: FxHashMap<String, BTreeMap<u64, Bytes>>,
    search_limit: usize,
    operations: AtomicU64,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::with_search_limit(DEFAULT_SEARCH_LIMIT)
    }

    /// Create a backend that rejects key queries larger than `limit`
    pub fn with_search_limit(limit: usize) -> Self {
        Self {
            collections: FxHashMap::default(),
            search_limit: limit.max(1),
            operations: AtomicU64::new(0),
        }
    }

    /// Build a backend around already-populated collections.
    pub(crate) fn from_collections(
        collections: FxHashMap<String, BTreeMap<u64, Bytes>>,
        search_limit: usize,
    ) -> Self {
        Self {
            collections,
            search_limit: search_limit.max(1),
            operations: AtomicU64::new(0),
        }
    }

    pub(crate) fn collection(&self, name: &str) -> Option<&BTreeMap<u64, Bytes>> {
        self.collections.get(name)
    }

    fn collection_or_err(&self, name: &str) -> Result<&BTreeMap<u64, Bytes>> {
        self.collections
            .get(name)
            .ok_or_else(|| QuadmapError::CollectionNotFound(name.to_string()))
    }

    fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.contains_key(name))
    }

    fn create_collection(&mut self, name: &str) -> Result<()> {
        self.collections.entry(name.to_string()).or_default();
        Ok(())
    }

    fn drop_collection(&mut self, name: &str) -> Result<()> {
        self.collections.remove(name);
        Ok(())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn num_entities(&self, name: &str) -> Result<usize> {
        Ok(self.collection_or_err(name)?.len())
    }

    fn insert(&mut self, name: &str, records: &[StoredRecord]) -> Result<()> {
        self.record_operation();
        let collection = self
            .collections
            .get_mut(name)
            .ok_or_else(|| QuadmapError::CollectionNotFound(name.to_string()))?;
        for record in records {
            collection.insert(record.key, record.value.clone());
        }
        Ok(())
    }

    fn query(&self, name: &str, keys: &[u64]) -> Result<Vec<StoredRecord>> {
        if keys.len() > self.search_limit {
            return Err(QuadmapError::QueryTooLarge {
                requested: keys.len(),
                limit: self.search_limit,
            });
        }
        self.record_operation();
        let collection = self.collection_or_err(name)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                collection
                    .get(key)
                    .map(|value| StoredRecord::new(*key, value.clone()))
            })
            .collect())
    }

    fn query_range(&self, name: &str, range: Range<u64>) -> Result<Vec<StoredRecord>> {
        self.record_operation();
        let collection = self.collection_or_err(name)?;
        Ok(collection
            .range(range)
            .map(|(key, value)| StoredRecord::new(*key, value.clone()))
            .collect())
    }

    fn flush(&mut self, name: &str) -> Result<()> {
        // No-op for in-memory storage
        self.record_operation();
        self.collection_or_err(name)?;
        Ok(())
    }

    fn search_limit(&self) -> usize {
        self.search_limit
    }

    fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            collection_count: self.collections.len(),
            record_count: self.collections.values().map(BTreeMap::len).sum(),
            size_bytes: self
                .collections
                .values()
                .flat_map(|c| c.values())
                .map(|v| v.len() + 8)
                .sum(),
            operations_count: self.operations.load(Ordering::Relaxed),
        })
    }
}
