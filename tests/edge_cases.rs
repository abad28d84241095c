use quadmap::prelude::*;
use quadmap::ErrorKind;

fn backend_with(dataset: &str, points: &[ImagePoint]) -> MemoryBackend {
    let mut backend = MemoryBackend::new();
    EmbeddingsCollection::for_dataset(dataset)
        .insert(&mut backend, points, 100)
        .expect("Failed to seed embeddings");
    backend
}

fn registry_with(names: &[&str]) -> DatasetRegistry {
    let mut registry = DatasetRegistry::in_memory();
    for name in names {
        registry.upsert(DatasetEntry::new(*name));
    }
    registry
}

fn has_outputs(backend: &MemoryBackend, dataset: &str) -> bool {
    let tiles = TileCollection::for_dataset(dataset);
    let images = ImageToTileCollection::for_dataset(dataset);
    backend.has_collection(tiles.name()).unwrap() || backend.has_collection(images.name()).unwrap()
}

/// Test 1: Too many coincident points cannot be separated by any zoom
#[test]
fn test_coincident_points_are_rejected() {
    let points: Vec<ImagePoint> = (0..50)
        .map(|i| ImagePoint::new(i, format!("{i}.jpg"), 3.0, 3.0))
        .collect();
    let mut backend = backend_with("dup", &points);
    let mut registry = registry_with(&["dup"]);

    let config = Config::default().with_max_points_per_tile(10);
    let err = BuildJob::new("dup")
        .config(config)
        .run(&mut backend, &mut registry)
        .expect_err("Coincident points should not tile");
    assert!(matches!(err, QuadmapError::InvalidInput(_)));
    assert!(!has_outputs(&backend, "dup"));
    assert_eq!(registry.get("dup").unwrap().zoom_levels, -1);
}

/// Test 2: A handful of coincident points is fine when they fit one tile
#[test]
fn test_coincident_points_within_capacity() {
    let mut points: Vec<ImagePoint> = (0..5)
        .map(|i| ImagePoint::new(i, format!("{i}.jpg"), 1.0, 1.0))
        .collect();
    points.push(ImagePoint::new(5, "5.jpg", 9.0, 9.0));
    let mut backend = backend_with("few", &points);

    let report = BuildJob::new("few")
        .config(Config::default().with_max_points_per_tile(5))
        .run(&mut backend, &mut registry_with(&["few"]))
        .expect("Build failed");
    assert_eq!(report.images_indexed, 6);
}

/// Test 3: A single image builds a one-tile pyramid
#[test]
fn test_single_point() {
    let points = vec![ImagePoint::new(0, "only.jpg", -2.5, 7.0)];
    let mut backend = backend_with("one", &points);

    let report = BuildJob::new("one")
        .run(&mut backend, &mut registry_with(&["one"]))
        .expect("Build failed");
    assert_eq!(report.max_zoom, 0);

    let index = TileIndex::open(&backend, "one", &ServingConfig::default()).unwrap();
    assert_eq!(index.tile_of_image(0), Some(TileCoord::ROOT));
    let root = index.tile(&backend, TileCoord::ROOT).unwrap().unwrap();
    assert_eq!(root.data.len(), 1);
    let range = root.range.expect("Root tile carries the data range");
    assert_eq!((range.x_min, range.x_max), (-2.5, -2.5));
    assert_eq!((range.y_min, range.y_max), (7.0, 7.0));
}

/// Test 4: Points on a vertical line have a zero-width bounding box
#[test]
fn test_points_on_a_line() {
    let points: Vec<ImagePoint> = (0..64)
        .map(|i| ImagePoint::new(i, format!("{i}.jpg"), 4.0, i as f64))
        .collect();
    let mut backend = backend_with("line", &points);

    let report = BuildJob::new("line")
        .config(Config::default().with_max_points_per_tile(4))
        .run(&mut backend, &mut registry_with(&["line"]))
        .expect("Build failed");
    assert_eq!(report.images_indexed, 64);

    // Every image lands in column 0 of its level.
    let index = TileIndex::open(&backend, "line", &ServingConfig::default()).unwrap();
    for i in 0..64 {
        assert_eq!(index.tile_of_image(i).unwrap().x, 0);
    }
}

/// Test 5: Missing, empty and gappy embeddings are input errors
#[test]
fn test_bad_embeddings() {
    let mut registry = registry_with(&["absent", "empty", "gappy"]);

    let mut backend = MemoryBackend::new();
    let err = BuildJob::new("absent")
        .run(&mut backend, &mut registry)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);

    let mut backend = backend_with("empty", &[]);
    let err = BuildJob::new("empty")
        .run(&mut backend, &mut registry)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(!has_outputs(&backend, "empty"));

    let gappy = vec![
        ImagePoint::new(0, "a.jpg", 0.0, 0.0),
        ImagePoint::new(1, "b.jpg", 1.0, 0.0),
        ImagePoint::new(7, "c.jpg", 0.0, 1.0),
    ];
    let mut backend = backend_with("gappy", &gappy);
    let err = BuildJob::new("gappy")
        .run(&mut backend, &mut registry)
        .unwrap_err();
    assert!(matches!(err, QuadmapError::InvalidInput(_)));
    assert!(!has_outputs(&backend, "gappy"));
}

/// Test 6: Non-finite coordinates are rejected before tiling
#[test]
fn test_non_finite_coordinates() {
    let points = vec![
        ImagePoint::new(0, "a.jpg", 0.0, 0.0),
        ImagePoint::new(1, "b.jpg", f64::NAN, 1.0),
    ];
    assert!(matches!(
        PointStore::new(points),
        Err(QuadmapError::InvalidInput(_))
    ));
}

/// Test 7: Serving an unbuilt dataset
#[test]
fn test_index_of_unbuilt_dataset() {
    let backend = backend_with("fresh", &[ImagePoint::new(0, "a.jpg", 0.0, 0.0)]);
    let err = TileIndex::open(&backend, "fresh", &ServingConfig::default()).unwrap_err();
    assert!(matches!(err, QuadmapError::CollectionNotFound(_)));
}

/// Test 8: Serving state is leased per dataset and released when idle
#[test]
fn test_leased_indexes() {
    let grid: Vec<ImagePoint> = (0..100)
        .map(|i| ImagePoint::new(i, format!("{i}.jpg"), (i % 10) as f64, (i / 10) as f64))
        .collect();
    let mut backend = backend_with("a", &grid);
    EmbeddingsCollection::for_dataset("b")
        .insert(&mut backend, &grid[..40], 100)
        .unwrap();
    let mut registry = registry_with(&["a", "b"]);
    for name in ["a", "b"] {
        BuildJob::new(name)
            .config(Config::default().with_max_points_per_tile(10))
            .run(&mut backend, &mut registry)
            .expect("Build failed");
    }

    let serving = ServingConfig::default();
    let leases: LeaseManager<TileIndex> = LeaseManager::new(2);
    let open = |name: &str| {
        leases
            .acquire(name, || TileIndex::open(&backend, name, &serving))
            .expect("Failed to open index")
    };

    assert_eq!(open("a").len(), 100);
    assert_eq!(open("b").len(), 40);
    assert!(leases.is_loaded("a"));
    open("b");
    assert!(!leases.is_loaded("a"));
    assert_eq!(leases.loaded(), vec!["b".to_string()]);

    // A failed load leaves the held leases alone.
    assert!(leases
        .acquire("missing", || TileIndex::open(&backend, "missing", &serving))
        .is_err());
    assert_eq!(leases.counter("b"), Some(2));
}
