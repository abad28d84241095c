//! Typed views over the collections a dataset owns.
//!
//! | Collection                       | Key            | Record                 |
//! |----------------------------------|----------------|------------------------|
//! | `<dataset>`                      | image index    | [`ImagePoint`]         |
//! | `<dataset>_zoom_levels_clusters` | global tile id | [`TileRecord`]         |
//! | `<dataset>_image_to_tile`        | image index    | [`ImageToTileRecord`]  |
//!
//! Records are stored as JSON. Every read is split into requests no larger
//! than the backend's search limit, and every write into requests of the
//! configured insert size.

use crate::error::{QuadmapError, Result};
use crate::points::ImagePoint;
use crate::storage::{StorageBackend, StoredRecord};
use crate::tile::{ImageToTileRecord, TileRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ops::Range;

fn encode<T: Serialize>(key: u64, value: &T) -> Result<StoredRecord> {
    Ok(StoredRecord::new(key, serde_json::to_vec(value)?))
}

fn decode<T: DeserializeOwned>(record: &StoredRecord) -> Result<T> {
    Ok(serde_json::from_slice(&record.value)?)
}

/// Insert `records` in requests of at most `insert_size`, then flush.
fn insert_chunked(
    backend: &mut dyn StorageBackend,
    name: &str,
    records: &[StoredRecord],
    insert_size: usize,
) -> Result<()> {
    for chunk in records.chunks(insert_size.max(1)) {
        backend.insert(name, chunk)?;
    }
    backend.flush(name)
}

/// Query `keys` in requests the backend accepts.
fn query_chunked(
    backend: &dyn StorageBackend,
    name: &str,
    keys: &[u64],
) -> Result<Vec<StoredRecord>> {
    let mut found = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(backend.search_limit().max(1)) {
        found.extend(backend.query(name, chunk)?);
    }
    Ok(found)
}

/// Read `range` in pages of the backend's search limit.
fn query_range_paged(
    backend: &dyn StorageBackend,
    name: &str,
    range: Range<u64>,
) -> Result<Vec<StoredRecord>> {
    let page = backend.search_limit().max(1) as u64;
    let mut found = Vec::new();
    let mut start = range.start;
    while start < range.end {
        let end = start.saturating_add(page).min(range.end);
        found.extend(backend.query_range(name, start..end)?);
        start = end;
    }
    Ok(found)
}

/// Source collection holding one projected point per image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingsCollection {
    name: String,
}

impl EmbeddingsCollection {
    pub fn for_dataset(dataset: &str) -> Self {
        Self {
            name: dataset.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write points keyed by their image index.
    pub fn insert(
        &self,
        backend: &mut dyn StorageBackend,
        points: &[ImagePoint],
        insert_size: usize,
    ) -> Result<()> {
        let records = points
            .iter()
            .map(|p| encode(p.index, p))
            .collect::<Result<Vec<_>>>()?;
        backend.create_collection(&self.name)?;
        insert_chunked(backend, &self.name, &records, insert_size)
    }

    /// Load every point. Images must be keyed `0..num_entities`.
    pub fn load(&self, backend: &dyn StorageBackend) -> Result<Vec<ImagePoint>> {
        if !backend.has_collection(&self.name)? {
            return Err(QuadmapError::InvalidInput(format!(
                "embeddings collection '{}' does not exist",
                self.name
            )));
        }
        let total = backend.num_entities(&self.name)?;
        if total == 0 {
            return Err(QuadmapError::InvalidInput(format!(
                "embeddings collection '{}' is empty",
                self.name
            )));
        }

        let points = query_range_paged(backend, &self.name, 0..total as u64)?
            .iter()
            .map(decode::<ImagePoint>)
            .collect::<Result<Vec<_>>>()?;

        if points.len() != total {
            return Err(QuadmapError::InvalidInput(format!(
                "embeddings collection '{}' holds {} entities but only {} are keyed 0..{}",
                self.name,
                total,
                points.len(),
                total
            )));
        }
        log::info!("Loaded {} points from {}", points.len(), self.name);
        Ok(points)
    }
}

/// Persisted tiles of a dataset, keyed by global tile index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileCollection {
    name: String,
}

impl TileCollection {
    pub fn for_dataset(dataset: &str) -> Self {
        Self {
            name: format!("{}_zoom_levels_clusters", dataset),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(
        &self,
        backend: &mut dyn StorageBackend,
        tiles: &[TileRecord],
        insert_size: usize,
    ) -> Result<()> {
        for chunk in tiles.chunks(insert_size.max(1)) {
            self.write(backend, chunk)?;
        }
        self.flush(backend)
    }

    /// Send one insert request without flushing.
    pub fn write(&self, backend: &mut dyn StorageBackend, tiles: &[TileRecord]) -> Result<()> {
        let records = tiles
            .iter()
            .map(|t| encode(t.index, t))
            .collect::<Result<Vec<_>>>()?;
        backend.insert(&self.name, &records)
    }

    pub fn flush(&self, backend: &mut dyn StorageBackend) -> Result<()> {
        backend.flush(&self.name)
    }

    /// Tiles with the given global indexes; missing ones are skipped.
    pub fn fetch(&self, backend: &dyn StorageBackend, indexes: &[u64]) -> Result<Vec<TileRecord>> {
        query_chunked(backend, &self.name, indexes)?
            .iter()
            .map(decode)
            .collect()
    }

    /// Tiles whose global index lies in `range`.
    pub fn fetch_range(
        &self,
        backend: &dyn StorageBackend,
        range: Range<u64>,
    ) -> Result<Vec<TileRecord>> {
        query_range_paged(backend, &self.name, range)?
            .iter()
            .map(decode)
            .collect()
    }
}

/// Image index to first-seen tile, keyed by image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageToTileCollection {
    name: String,
}

impl ImageToTileCollection {
    pub fn for_dataset(dataset: &str) -> Self {
        Self {
            name: format!("{}_image_to_tile", dataset),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(
        &self,
        backend: &mut dyn StorageBackend,
        entries: &[ImageToTileRecord],
        insert_size: usize,
    ) -> Result<()> {
        let records = entries
            .iter()
            .map(|e| encode(e.index, e))
            .collect::<Result<Vec<_>>>()?;
        insert_chunked(backend, &self.name, &records, insert_size)
    }

    pub fn fetch(
        &self,
        backend: &dyn StorageBackend,
        indexes: &[u64],
    ) -> Result<Vec<ImageToTileRecord>> {
        query_chunked(backend, &self.name, indexes)?
            .iter()
            .map(decode)
            .collect()
    }

    /// Every entry, in image index order.
    pub fn fetch_all(&self, backend: &dyn StorageBackend) -> Result<Vec<ImageToTileRecord>> {
        backend
            .query_range(&self.name, 0..u64::MAX)?
            .iter()
            .map(decode)
            .collect()
    }
}
