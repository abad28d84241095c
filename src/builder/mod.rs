//! Memory-bounded construction of the tile pyramid.
//!
//! [`ZoomLevelBuilder`] walks the quadtree from the root down to the finest
//! grid, one level at a time and row-major within a level. For every tile it
//!
//! 1. flushes and evicts when the resident tile count reaches
//!    `limit_for_total`,
//! 2. looks up the parent tile, fetching it back from storage if it was
//!    evicted,
//! 3. selects the tile's representatives, pinning those inherited from the
//!    parent, and
//! 4. records every newly selected image in the image-to-tile map.
//!
//! Finished tiles stay in memory, unflushed, until the next flush. After the
//! finest level every remaining tile is flushed and the image-to-tile map is
//! written.

pub mod budget;
pub mod working_set;

pub use budget::ResidentBudget;
pub use working_set::WorkingSet;

use crate::cluster::{ModifiedKMeans, squared_distance};
use crate::collections::{ImageToTileCollection, TileCollection};
use crate::config::{ClusteringConfig, Config, MemoryConfig, StorageConfig};
use crate::error::{QuadmapError, Result};
use crate::points::PointStore;
use crate::storage::StorageBackend;
use crate::tile::{ImageToTileRecord, Representative, TileState};
use crate::tiling::Grid;
use quadmap_types::{BoundingBox2D, TileCoord, TileRange};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

/// Counters collected while building.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub tiles_built: u64,
    pub tiles_written: u64,
    /// Tiles whose points had to be clustered
    pub tiles_clustered: u64,
    /// Flushes forced by the resident limit
    pub pressure_flushes: u64,
    pub tiles_evicted: u64,
    pub tiles_refetched: u64,
    pub peak_resident: usize,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub max_zoom: u32,
    /// First tile at which each image became a representative
    pub image_to_tile: BTreeMap<u64, TileCoord>,
    pub stats: BuildStats,
}

pub struct ZoomLevelBuilder<'a> {
    store: &'a PointStore,
    grid: &'a Grid,
    backend: &'a mut dyn StorageBackend,
    tiles: TileCollection,
    image_to_tile: ImageToTileCollection,
    clustering: ClusteringConfig,
    memory: MemoryConfig,
    storage: StorageConfig,
    kmeans: ModifiedKMeans,
    working_set: WorkingSet,
    first_seen: FxHashMap<u64, TileCoord>,
    stats: BuildStats,
}

impl<'a> ZoomLevelBuilder<'a> {
    pub fn new(
        dataset: &str,
        store: &'a PointStore,
        grid: &'a Grid,
        backend: &'a mut dyn StorageBackend,
        config: &Config,
    ) -> Self {
        Self {
            store,
            grid,
            backend,
            tiles: TileCollection::for_dataset(dataset),
            image_to_tile: ImageToTileCollection::for_dataset(dataset),
            clustering: config.clustering.clone(),
            memory: config.memory.clone(),
            storage: config.storage.clone(),
            kmeans: ModifiedKMeans::from_config(&config.clustering),
            working_set: WorkingSet::new(),
            first_seen: FxHashMap::default(),
            stats: BuildStats::default(),
        }
    }

    /// Build every level, persist all tiles and the image-to-tile map.
    pub fn build(mut self) -> Result<BuildOutput> {
        self.backend.create_collection(self.tiles.name())?;
        self.backend.create_collection(self.image_to_tile.name())?;

        let max_zoom = self.grid.max_zoom();
        for zoom in 0..=max_zoom {
            log::info!(
                "Building zoom level {}/{} ({} tiles, {} resident)",
                zoom,
                max_zoom,
                TileCoord::tiles_per_axis(zoom).pow(2),
                self.working_set.len()
            );
            for coord in TileCoord::tiles_at(zoom) {
                self.process(coord)?;
            }
        }

        self.flush()?;
        let image_to_tile = self.persist_image_to_tile()?;

        log::info!(
            "Built {} tiles up to zoom {} ({} forced flushes, {} evicted, {} refetched)",
            self.stats.tiles_built,
            max_zoom,
            self.stats.pressure_flushes,
            self.stats.tiles_evicted,
            self.stats.tiles_refetched
        );

        Ok(BuildOutput {
            max_zoom,
            image_to_tile,
            stats: self.stats,
        })
    }

    fn process(&mut self, coord: TileCoord) -> Result<()> {
        if self.working_set.len() >= self.memory.limit_for_total {
            self.flush()?;
            self.stats.pressure_flushes += 1;
            let evicted = self.working_set.evict(coord, self.memory.limit_for_keep)?;
            self.stats.tiles_evicted += evicted as u64;
        }

        let inherited = match coord.parent() {
            Some(parent) => self.inherited_representatives(parent, coord)?,
            None => Vec::new(),
        };

        let raw = self.grid.points_in_tile(coord);
        let representatives = self.select_representatives(coord, &raw, &inherited)?;

        for rep in representatives.iter().filter(|rep| !rep.in_previous) {
            self.first_seen
                .entry(self.store[rep.position].index)
                .or_insert(coord);
        }

        let mut state = TileState::new(representatives);
        if coord.zoom == 0 {
            state.range = BoundingBox2D::from_coords(
                raw.iter().map(|&p| (self.store[p].x, self.store[p].y)),
            )
            .map(TileRange::from);
        }

        self.working_set.insert(coord, state);
        self.stats.tiles_built += 1;
        self.stats.peak_resident = self.stats.peak_resident.max(self.working_set.len());
        Ok(())
    }

    /// The parent's representatives whose points lie inside `coord`.
    fn inherited_representatives(
        &mut self,
        parent: TileCoord,
        coord: TileCoord,
    ) -> Result<Vec<Representative>> {
        if !self.working_set.contains(&parent) {
            self.fetch_from(parent)?;
        }
        let state = self
            .working_set
            .get(&parent)
            .ok_or_else(|| QuadmapError::MissingTile(parent.to_string()))?;

        Ok(state
            .representatives
            .iter()
            .filter(|rep| {
                self.grid
                    .tile_of(rep.position)
                    .and_then(|finest| finest.ancestor_at(coord.zoom))
                    == Some(coord)
            })
            .copied()
            .collect())
    }

    /// Reload `start` and the non-resident tiles following it on its level.
    fn fetch_from(&mut self, start: TileCoord) -> Result<()> {
        let wanted: Vec<u64> = self
            .working_set
            .missing_from(start, self.memory.limit_for_fetch)
            .iter()
            .map(TileCoord::index)
            .collect();

        let mut fetched = 0;
        for chunk in wanted.chunks(self.storage.search_limit.max(1)) {
            for record in self.tiles.fetch(&*self.backend, chunk)? {
                if record.tile.index() != record.index {
                    return Err(QuadmapError::Storage(format!(
                        "tile record {} is stored under index {}",
                        record.tile, record.index
                    )));
                }
                let state = TileState::from_record(&record, self.store)?;
                self.working_set.insert(record.tile, state);
                fetched += 1;
            }
        }

        log::debug!(
            "Refetched {} of {} requested tiles starting at {}",
            fetched,
            wanted.len(),
            start
        );
        self.stats.tiles_refetched += fetched;
        Ok(())
    }

    /// Pick the representatives of `coord` from its raw points.
    ///
    /// Small tiles keep every point. Larger ones are clustered with the
    /// inherited representatives pinned as the first centroids; each pinned
    /// cluster is represented by its inherited point and each other
    /// non-empty cluster by the member closest to its centroid.
    fn select_representatives(
        &mut self,
        coord: TileCoord,
        raw: &[usize],
        inherited: &[Representative],
    ) -> Result<Vec<Representative>> {
        let representatives = if raw.len() <= self.clustering.max_images_per_tile {
            let inherited: FxHashSet<usize> = inherited.iter().map(|rep| rep.position).collect();
            raw.iter()
                .map(|&p| Representative::new(p, 0, inherited.contains(&p)))
                .collect()
        } else {
            self.stats.tiles_clustered += 1;
            self.cluster(coord, raw, inherited)?
        };

        let covered: usize = representatives.iter().map(Representative::weight).sum();
        if covered != raw.len() {
            return Err(QuadmapError::Invariant(format!(
                "representatives of tile {} cover {} points out of {}",
                coord,
                covered,
                raw.len()
            )));
        }
        Ok(representatives)
    }

    fn cluster(
        &mut self,
        coord: TileCoord,
        raw: &[usize],
        inherited: &[Representative],
    ) -> Result<Vec<Representative>> {
        let k = self.clustering.number_of_clusters;
        let pinned = inherited.len();
        if pinned > k {
            return Err(QuadmapError::Invariant(format!(
                "tile {} inherits {} representatives but holds only {} clusters",
                coord, pinned, k
            )));
        }

        let data: Vec<[f64; 2]> = raw.iter().map(|&p| self.store[p].coords()).collect();
        let fixed: Vec<[f64; 2]> = inherited
            .iter()
            .map(|rep| self.store[rep.position].coords())
            .collect();

        let centers = self
            .kmeans
            .fit(&data, (!fixed.is_empty()).then_some(fixed.as_slice()))?
            .to_vec();

        let mut labels = data
            .iter()
            .map(|point| self.kmeans.predict(point))
            .collect::<Result<Vec<_>>>()?;

        // An inherited point always belongs to its own cluster, even when a
        // lower-numbered centroid sits at the same coordinates.
        for (cluster, rep) in inherited.iter().enumerate() {
            let member = raw.iter().position(|&p| p == rep.position).ok_or_else(|| {
                QuadmapError::Invariant(format!(
                    "inherited representative {} is not inside tile {}",
                    self.store[rep.position].index, coord
                ))
            })?;
            labels[member] = cluster;
        }

        let mut sizes = vec![0usize; centers.len()];
        let mut closest: Vec<Option<(usize, f64)>> = vec![None; centers.len()];
        for (member, &label) in labels.iter().enumerate() {
            sizes[label] += 1;
            let distance = squared_distance(&data[member], &centers[label]);
            match closest[label] {
                Some((_, best)) if best <= distance => {}
                _ => closest[label] = Some((member, distance)),
            }
        }

        let mut representatives = Vec::with_capacity(centers.len());
        for (cluster, rep) in inherited.iter().enumerate() {
            representatives.push(Representative::new(rep.position, sizes[cluster] - 1, true));
        }
        for cluster in pinned..centers.len() {
            if let Some((member, _)) = closest[cluster] {
                representatives.push(Representative::new(raw[member], sizes[cluster] - 1, false));
            }
        }
        Ok(representatives)
    }

    /// Write every unflushed resident tile, then flush the tile collection.
    fn flush(&mut self) -> Result<()> {
        let active = self.working_set.active();
        if active.is_empty() {
            return Ok(());
        }

        for chunk in active.chunks(self.storage.insert_size.max(1)) {
            let records = chunk
                .iter()
                .map(|coord| {
                    self.working_set
                        .get(coord)
                        .ok_or_else(|| QuadmapError::MissingTile(coord.to_string()))?
                        .to_record(*coord, self.store, &self.first_seen)
                })
                .collect::<Result<Vec<_>>>()?;
            self.tiles.write(&mut *self.backend, &records)?;
        }
        self.tiles.flush(&mut *self.backend)?;

        self.working_set.mark_flushed(&active);
        self.stats.tiles_written += active.len() as u64;
        log::info!(
            "Flushed {} tiles to {} ({} resident)",
            active.len(),
            self.tiles.name(),
            self.working_set.len()
        );
        Ok(())
    }

    fn persist_image_to_tile(&mut self) -> Result<BTreeMap<u64, TileCoord>> {
        let image_to_tile: BTreeMap<u64, TileCoord> = self.first_seen.drain().collect();
        let entries: Vec<ImageToTileRecord> = image_to_tile
            .iter()
            .map(|(&index, &tile)| ImageToTileRecord { index, tile })
            .collect();
        self.image_to_tile
            .insert(&mut *self.backend, &entries, self.storage.insert_size)?;
        log::info!(
            "Wrote {} image-to-tile entries to {}",
            entries.len(),
            self.image_to_tile.name()
        );
        Ok(image_to_tile)
    }
}
