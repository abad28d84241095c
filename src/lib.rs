//! Memory-bounded quadtree tiling for zoomable image-embedding maps.
//!
//! Images projected to 2-D are bucketed into the coarsest grid whose cells
//! hold at most a fixed number of points, then a quadtree is built from the
//! root down to that grid. Each tile keeps a bounded set of representative
//! images, and representatives chosen at a coarse level are carried into
//! every finer tile that contains them.
//!
//! ```rust
//! use quadmap::prelude::*;
//!
//! let points: Vec<ImagePoint> = (0..200)
//!     .map(|i| ImagePoint::new(i, format!("{i}.jpg"), (i % 20) as f64, (i / 20) as f64))
//!     .collect();
//!
//! let mut backend = MemoryBackend::new();
//! EmbeddingsCollection::for_dataset("demo").insert(&mut backend, &points, 500)?;
//!
//! let mut registry = DatasetRegistry::in_memory();
//! registry.upsert(DatasetEntry::new("demo"));
//!
//! let config = Config::default().with_max_points_per_tile(10);
//! let report = BuildJob::new("demo").config(config).run(&mut backend, &mut registry)?;
//! assert_eq!(report.images_indexed, 200);
//!
//! let index = TileIndex::open(&backend, "demo", &ServingConfig::default())?;
//! let tile = index.tile_of_image(42).unwrap();
//! assert!(tile.zoom <= report.max_zoom);
//! # Ok::<(), quadmap::QuadmapError>(())
//! ```

pub mod builder;
pub mod cluster;
pub mod collections;
pub mod config;
pub mod error;
pub mod index;
pub mod job;
pub mod lease;
pub mod points;
pub mod registry;
pub mod storage;
pub mod tile;
pub mod tiling;

pub use builder::{BuildOutput, BuildStats, ZoomLevelBuilder};
pub use cluster::ModifiedKMeans;
pub use collections::{EmbeddingsCollection, ImageToTileCollection, TileCollection};
pub use config::{
    ClusteringConfig, Config, MemoryConfig, ServingConfig, StorageConfig, TilingConfig,
};
pub use error::{ErrorKind, QuadmapError, Result};
pub use index::TileIndex;
pub use job::{BuildJob, BuildReport, drop_outputs};
pub use lease::LeaseManager;
pub use points::{ImagePoint, PointStore};
pub use registry::{DatasetEntry, DatasetRegistry};
pub use tile::{ImageToTileRecord, Representative, RepresentativeRecord, TileRecord, TileState};
pub use tiling::{Grid, Tiler};

pub use storage::{MemoryBackend, StorageBackend, StorageStats, StoredRecord};

#[cfg(feature = "snapshot")]
pub use storage::{SnapshotBackend, SnapshotFile};

pub use quadmap_types::{BoundingBox2D, MAX_ZOOM, TileCoord, TileRange};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{BuildJob, BuildReport, Config, Result, QuadmapError};

    pub use crate::{ImagePoint, PointStore, Tiler, ZoomLevelBuilder};

    pub use crate::{DatasetEntry, DatasetRegistry, LeaseManager, TileIndex};

    pub use crate::{EmbeddingsCollection, ImageToTileCollection, TileCollection};

    pub use crate::{MemoryBackend, StorageBackend};

    #[cfg(feature = "snapshot")]
    pub use crate::SnapshotBackend;

    pub use crate::ServingConfig;

    pub use quadmap_types::{BoundingBox2D, TileCoord};
}
