use quadmap::prelude::*;
use quadmap::storage::{StorageStats, StoredRecord};
use quadmap::{ErrorKind, Grid, TileRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::ops::Range;

fn uniform_points(n: u64, seed: u64) -> Vec<ImagePoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            ImagePoint::new(i, format!("img/{i}.jpg"), rng.gen_range(-5.0..5.0), rng.gen_range(0.0..1.0))
                .with_size(256, 192)
        })
        .collect()
}

fn seeded_backend(points: &[ImagePoint]) -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    EmbeddingsCollection::for_dataset("art")
        .insert(&mut backend, points, 500)
        .unwrap();
    backend
}

fn registry() -> DatasetRegistry {
    let mut registry = DatasetRegistry::in_memory();
    registry.upsert(DatasetEntry::new("art").with_website_name("Art"));
    registry
}

fn all_tiles(backend: &dyn StorageBackend, max_zoom: u32) -> Vec<TileRecord> {
    TileCollection::for_dataset("art")
        .fetch_range(backend, 0..TileCoord::zoom_offset(max_zoom + 1))
        .unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grid_for(points: &[ImagePoint], config: &Config) -> (PointStore, Grid) {
    let store = PointStore::new(points.to_vec()).unwrap();
    let grid = Tiler::from_config(&config.tiling).tile(&store).unwrap();
    (store, grid)
}

#[test]
fn test_hundred_uniform_points() {
    let points = uniform_points(100, 1);
    let mut backend = seeded_backend(&points);
    let mut registry = registry();
    let config = Config::default().with_max_points_per_tile(10);

    let report = BuildJob::new("art")
        .config(config.clone())
        .run(&mut backend, &mut registry)
        .unwrap();

    let tiles = all_tiles(&backend, report.max_zoom);
    let root = &tiles[0];
    assert_eq!(root.tile, TileCoord::ROOT);
    assert!(root.data.len() <= config.clustering.number_of_clusters);
    assert!(root.range.is_some());
    assert!(tiles[1..].iter().all(|t| t.range.is_none()));

    let index = TileIndex::open(&backend, "art", &ServingConfig::default()).unwrap();
    assert_eq!(index.len(), 100);
    for point in &points {
        let tile = index.tile_of_image(point.index).unwrap();
        assert!(tile.is_valid());
        assert!(tile.zoom <= report.max_zoom);
    }
    assert_eq!(registry.get("art").unwrap().zoom_levels, i64::from(report.max_zoom));
}

#[test]
fn test_global_index_is_dense_and_matches_coordinates() {
    let points = uniform_points(150, 2);
    let mut backend = seeded_backend(&points);
    let config = Config::default().with_max_points_per_tile(8);
    let report = BuildJob::new("art")
        .config(config)
        .run(&mut backend, &mut registry())
        .unwrap();

    let tiles = all_tiles(&backend, report.max_zoom);
    assert_eq!(tiles.len() as u64, TileCoord::zoom_offset(report.max_zoom + 1));
    for (expected, record) in tiles.iter().enumerate() {
        assert_eq!(record.index, expected as u64);
        assert_eq!(record.tile.index(), record.index);
        assert_eq!(TileCoord::from_index(record.index), Some(record.tile));
    }
}

#[test]
fn test_representatives_carry_into_children() {
    let points = uniform_points(400, 3);
    let config = Config::default().with_max_points_per_tile(12);
    let mut backend = seeded_backend(&points);
    let report = BuildJob::new("art")
        .config(config.clone())
        .run(&mut backend, &mut registry())
        .unwrap();

    let (store, grid) = grid_for(&points, &config);
    assert_eq!(grid.max_zoom(), report.max_zoom);
    let tiles: BTreeMap<TileCoord, TileRecord> = all_tiles(&backend, report.max_zoom)
        .into_iter()
        .map(|t| (t.tile, t))
        .collect();

    for (coord, record) in tiles.iter().filter(|(c, _)| c.zoom < report.max_zoom) {
        for rep in &record.data {
            let position = store.position_of(rep.index).unwrap();
            let child = grid
                .tile_of(position)
                .and_then(|finest| finest.ancestor_at(coord.zoom + 1))
                .unwrap();
            assert!(coord.children().contains(&child));
            let carried = tiles[&child]
                .data
                .iter()
                .find(|r| r.index == rep.index)
                .unwrap_or_else(|| panic!("{} missing from {}", rep.index, child));
            assert_eq!((carried.x, carried.y), (rep.x, rep.y));
            assert_eq!(carried.zoom, rep.zoom);
        }
    }
}

#[test]
fn test_image_to_tile_records_coarsest_zoom() {
    let points = uniform_points(300, 4);
    let mut backend = seeded_backend(&points);
    let report = BuildJob::new("art")
        .config(Config::default().with_max_points_per_tile(10))
        .run(&mut backend, &mut registry())
        .unwrap();

    let mut coarsest: BTreeMap<u64, TileCoord> = BTreeMap::new();
    for record in all_tiles(&backend, report.max_zoom) {
        for rep in &record.data {
            let seen = coarsest.entry(rep.index).or_insert(record.tile);
            if record.tile.zoom < seen.zoom {
                *seen = record.tile;
            }
            assert!(rep.zoom <= record.tile.zoom);
        }
    }

    let index = TileIndex::open(&backend, "art", &ServingConfig::default()).unwrap();
    assert_eq!(coarsest.len(), index.len());
    for (image, tile) in coarsest {
        assert_eq!(index.tile_of_image(image), Some(tile));
    }
}

#[test]
fn test_memory_bounded_build_matches_unbounded() {
    init_logging();
    let points = uniform_points(200, 5);
    let base = Config::default().with_max_points_per_tile(10);

    let mut unbounded = seeded_backend(&points);
    let free = BuildJob::new("art")
        .config(base.clone())
        .run(&mut unbounded, &mut registry())
        .unwrap();
    assert_eq!(free.stats.pressure_flushes, 0);

    let tight = base.with_memory_limits(6, 3, 4).with_storage_limits(3, 2);
    let mut bounded = seeded_backend(&points);
    let constrained = BuildJob::new("art")
        .config(tight)
        .run(&mut bounded, &mut registry())
        .unwrap();
    assert!(constrained.stats.pressure_flushes > 0);
    assert!(constrained.stats.tiles_evicted > 0);
    assert!(constrained.stats.tiles_refetched > 0);
    assert_eq!(constrained.stats.tiles_written, free.stats.tiles_written);

    assert_eq!(
        all_tiles(&bounded, constrained.max_zoom),
        all_tiles(&unbounded, free.max_zoom)
    );
    let images = ImageToTileCollection::for_dataset("art");
    assert_eq!(
        images.fetch_all(&bounded).unwrap(),
        images.fetch_all(&unbounded).unwrap()
    );
}

#[test]
fn test_shuffled_input_still_covers_every_image() {
    let points = uniform_points(120, 6);
    let mut backend = seeded_backend(&points);
    let config = Config::default().with_max_points_per_tile(10).with_shuffle_seed(99);
    let report = BuildJob::new("art")
        .config(config)
        .run(&mut backend, &mut registry())
        .unwrap();
    assert_eq!(report.images_indexed, 120);
}

/// Delegates to a memory backend but fails every write to one collection
/// once `remaining` inserts have gone through.
struct FailingBackend {
    inner: MemoryBackend,
    target: String,
    remaining: usize,
}

impl StorageBackend for FailingBackend {
    fn has_collection(&self, name: &str) -> quadmap::Result<bool> {
        self.inner.has_collection(name)
    }

    fn create_collection(&mut self, name: &str) -> quadmap::Result<()> {
        self.inner.create_collection(name)
    }

    fn drop_collection(&mut self, name: &str) -> quadmap::Result<()> {
        self.inner.drop_collection(name)
    }

    fn list_collections(&self) -> quadmap::Result<Vec<String>> {
        self.inner.list_collections()
    }

    fn num_entities(&self, name: &str) -> quadmap::Result<usize> {
        self.inner.num_entities(name)
    }

    fn insert(&mut self, name: &str, records: &[StoredRecord]) -> quadmap::Result<()> {
        if name == self.target {
            if self.remaining == 0 {
                return Err(QuadmapError::Storage("disk full".to_string()));
            }
            self.remaining -= 1;
        }
        self.inner.insert(name, records)
    }

    fn query(&self, name: &str, keys: &[u64]) -> quadmap::Result<Vec<StoredRecord>> {
        self.inner.query(name, keys)
    }

    fn query_range(&self, name: &str, range: Range<u64>) -> quadmap::Result<Vec<StoredRecord>> {
        self.inner.query_range(name, range)
    }

    fn flush(&mut self, name: &str) -> quadmap::Result<()> {
        self.inner.flush(name)
    }

    fn search_limit(&self) -> usize {
        self.inner.search_limit()
    }

    fn stats(&self) -> quadmap::Result<StorageStats> {
        self.inner.stats()
    }
}

#[test]
fn test_storage_failure_tears_down_outputs() {
    init_logging();
    let points = uniform_points(150, 7);
    let mut backend = FailingBackend {
        inner: seeded_backend(&points),
        target: TileCollection::for_dataset("art").name().to_string(),
        remaining: 2,
    };
    let mut registry = registry();
    let config = Config::default()
        .with_max_points_per_tile(10)
        .with_memory_limits(8, 4, 8)
        .with_storage_limits(5, 16);

    let err = BuildJob::new("art")
        .config(config)
        .run(&mut backend, &mut registry)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert!(!backend.has_collection("art_zoom_levels_clusters").unwrap());
    assert!(!backend.has_collection("art_image_to_tile").unwrap());
    assert_eq!(backend.num_entities("art").unwrap(), 150);
    assert_eq!(registry.get("art").unwrap().zoom_levels, -1);
}
