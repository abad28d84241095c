//! Serving-time lookups over a built dataset.

use crate::collections::{ImageToTileCollection, TileCollection};
use crate::config::ServingConfig;
use crate::error::{QuadmapError, Result};
use crate::storage::StorageBackend;
use crate::tile::TileRecord;
use quadmap_types::TileCoord;
use rustc_hash::FxHashMap;

/// Read-only index of a dataset's tiles.
///
/// Opening the index loads the whole image-to-tile map into memory so that
/// "where is image N" is a hash lookup; tile records themselves stay in
/// storage and are fetched on demand.
#[derive(Debug, Clone)]
pub struct TileIndex {
    dataset: String,
    tiles: TileCollection,
    image_to_tile: FxHashMap<u64, TileCoord>,
    first_tiles_limit: u64,
}

impl TileIndex {
    pub fn open(
        backend: &dyn StorageBackend,
        dataset: &str,
        serving: &ServingConfig,
    ) -> Result<Self> {
        let tiles = TileCollection::for_dataset(dataset);
        let images = ImageToTileCollection::for_dataset(dataset);
        for name in [tiles.name(), images.name()] {
            if !backend.has_collection(name)? {
                return Err(QuadmapError::CollectionNotFound(name.to_string()));
            }
        }

        let image_to_tile: FxHashMap<u64, TileCoord> = images
            .fetch_all(backend)?
            .into_iter()
            .map(|entry| (entry.index, entry.tile))
            .collect();
        log::info!(
            "Opened tile index for {} ({} images)",
            dataset,
            image_to_tile.len()
        );

        Ok(Self {
            dataset: dataset.to_string(),
            tiles,
            image_to_tile,
            first_tiles_limit: serving.first_tiles_limit,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Number of images with a first-seen tile.
    pub fn len(&self) -> usize {
        self.image_to_tile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_to_tile.is_empty()
    }

    /// Tile at which an image first became a representative.
    pub fn tile_of_image(&self, index: u64) -> Option<TileCoord> {
        self.image_to_tile.get(&index).copied()
    }

    /// Tiles by global index, in request order; unknown indexes are skipped.
    pub fn tiles(&self, backend: &dyn StorageBackend, indexes: &[u64]) -> Result<Vec<TileRecord>> {
        self.tiles.fetch(backend, indexes)
    }

    /// Tiles by coordinate; invalid coordinates are skipped.
    pub fn tiles_at(
        &self,
        backend: &dyn StorageBackend,
        coords: &[TileCoord],
    ) -> Result<Vec<TileRecord>> {
        let indexes: Vec<u64> = coords
            .iter()
            .filter(|coord| coord.is_valid())
            .map(TileCoord::index)
            .collect();
        self.tiles(backend, &indexes)
    }

    pub fn tile(&self, backend: &dyn StorageBackend, coord: TileCoord) -> Result<Option<TileRecord>> {
        Ok(self.tiles_at(backend, &[coord])?.pop())
    }

    /// Tiles needed for the initial view: every record with a global index
    /// below `min(num_entities, first_tiles_limit)`.
    pub fn first_tiles(&self, backend: &dyn StorageBackend) -> Result<Vec<TileRecord>> {
        let count = backend.num_entities(self.tiles.name())? as u64;
        self.tiles
            .fetch_range(backend, 0..count.min(self.first_tiles_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tile::ImageToTileRecord;

    fn seeded_backend(levels: u32) -> MemoryBackend {
        let mut backend = MemoryBackend::with_search_limit(4);
        let tiles = TileCollection::for_dataset("ds");
        let images = ImageToTileCollection::for_dataset("ds");
        backend.create_collection(tiles.name()).unwrap();
        backend.create_collection(images.name()).unwrap();

        let records: Vec<TileRecord> = (0..levels)
            .flat_map(TileCoord::tiles_at)
            .map(|coord| TileRecord {
                index: coord.index(),
                tile: coord,
                data: Vec::new(),
                range: None,
            })
            .collect();
        tiles.insert(&mut backend, &records, 100).unwrap();
        images
            .insert(
                &mut backend,
                &[
                    ImageToTileRecord { index: 0, tile: TileCoord::ROOT },
                    ImageToTileRecord { index: 1, tile: TileCoord::new(1, 1, 0) },
                ],
                100,
            )
            .unwrap();
        backend
    }

    #[test]
    fn test_lookups() {
        let backend = seeded_backend(3);
        let index = TileIndex::open(&backend, "ds", &ServingConfig::default()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.tile_of_image(1), Some(TileCoord::new(1, 1, 0)));
        assert_eq!(index.tile_of_image(7), None);

        let tile = index.tile(&backend, TileCoord::new(2, 3, 1)).unwrap().unwrap();
        assert_eq!(tile.index, TileCoord::new(2, 3, 1).index());
        assert!(index.tile(&backend, TileCoord::new(2, 9, 9)).unwrap().is_none());

        let many = index.tiles(&backend, &(0..10).collect::<Vec<_>>()).unwrap();
        assert_eq!(many.len(), 10);
    }

    #[test]
    fn test_first_tiles_is_capped() {
        let backend = seeded_backend(3);
        let serving = ServingConfig {
            first_tiles_limit: 6,
            ..ServingConfig::default()
        };
        let index = TileIndex::open(&backend, "ds", &serving).unwrap();
        let first = index.first_tiles(&backend).unwrap();
        assert_eq!(
            first.iter().map(|t| t.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );

        let uncapped = TileIndex::open(&backend, "ds", &ServingConfig::default()).unwrap();
        assert_eq!(uncapped.first_tiles(&backend).unwrap().len(), 21);
    }

    #[test]
    fn test_open_requires_collections() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            TileIndex::open(&backend, "missing", &ServingConfig::default()),
            Err(QuadmapError::CollectionNotFound(_))
        ));
    }
}
