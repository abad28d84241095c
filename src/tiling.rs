//! Finest-grid search.
//!
//! The [`Tiler`] finds the smallest zoom level at which every cell of the
//! `2^zoom × 2^zoom` grid over the points' bounding box holds at most
//! `max_points_per_tile` points. That level becomes the deepest level of the
//! quadtree; every coarser tile is a union of finest cells.

use crate::config::TilingConfig;
use crate::error::{QuadmapError, Result};
use crate::points::PointStore;
use quadmap_types::{BoundingBox2D, MAX_ZOOM, TileCoord};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Tiler {
    max_points_per_tile: usize,
    max_zoom_limit: u32,
}

impl Tiler {
    pub fn new(max_points_per_tile: usize) -> Self {
        Self {
            max_points_per_tile: max_points_per_tile.max(1),
            max_zoom_limit: TilingConfig::default().max_zoom_limit,
        }
    }

    pub fn from_config(config: &TilingConfig) -> Self {
        Self::new(config.max_points_per_tile).with_max_zoom_limit(config.max_zoom_limit)
    }

    pub fn with_max_zoom_limit(mut self, limit: u32) -> Self {
        self.max_zoom_limit = limit.min(MAX_ZOOM);
        self
    }

    /// Bucket every point of `store` into the finest grid.
    ///
    /// Fails when even `max_zoom_limit` leaves a cell over capacity, which
    /// only happens when more than `max_points_per_tile` points coincide.
    pub fn tile(&self, store: &PointStore) -> Result<Grid> {
        let bounds = store.bounding_box();

        for zoom in 0..=self.max_zoom_limit {
            let cells = TileCoord::tiles_per_axis(zoom);
            let mut counts: FxHashMap<(u32, u32), usize> = FxHashMap::default();
            let mut fits = true;
            for point in store.iter() {
                let count = counts
                    .entry(bounds.cell_of(point.x, point.y, cells))
                    .or_insert(0);
                *count += 1;
                if *count > self.max_points_per_tile {
                    fits = false;
                    break;
                }
            }
            if fits {
                log::info!(
                    "Finest grid: zoom {} ({} occupied cells for {} points)",
                    zoom,
                    counts.len(),
                    store.len()
                );
                return Ok(Grid::bucket(store, bounds, zoom));
            }
        }

        Err(QuadmapError::InvalidInput(format!(
            "more than {} points share a cell even at zoom {}; too many coincident points",
            self.max_points_per_tile, self.max_zoom_limit
        )))
    }
}

/// Assignment of every point to a cell of the finest grid.
#[derive(Debug, Clone)]
pub struct Grid {
    max_zoom: u32,
    bounds: BoundingBox2D,
    assignments: Vec<(u32, u32)>,
    cells: BTreeMap<(u32, u32), Vec<usize>>,
}

impl Grid {
    fn bucket(store: &PointStore, bounds: BoundingBox2D, max_zoom: u32) -> Self {
        let cells_per_axis = TileCoord::tiles_per_axis(max_zoom);
        let mut cells: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
        let assignments: Vec<(u32, u32)> = store
            .iter()
            .enumerate()
            .map(|(position, point)| {
                let cell = bounds.cell_of(point.x, point.y, cells_per_axis);
                cells.entry(cell).or_default().push(position);
                cell
            })
            .collect();

        Self {
            max_zoom,
            bounds,
            assignments,
            cells,
        }
    }

    /// Deepest zoom level of the quadtree.
    pub fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    pub fn bounds(&self) -> BoundingBox2D {
        self.bounds
    }

    /// Finest cell of the point at a store position.
    pub fn cell_of(&self, position: usize) -> Option<(u32, u32)> {
        self.assignments.get(position).copied()
    }

    /// Finest tile holding the point at a store position.
    pub fn tile_of(&self, position: usize) -> Option<TileCoord> {
        self.cell_of(position)
            .map(|(x, y)| TileCoord::new(self.max_zoom, x, y))
    }

    /// Occupied finest cells with their members.
    pub fn cells(&self) -> impl Iterator<Item = ((u32, u32), &[usize])> {
        self.cells.iter().map(|(cell, members)| (*cell, members.as_slice()))
    }

    pub fn largest_cell(&self) -> usize {
        self.cells.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Store positions of every point inside `tile`.
    ///
    /// A tile at zoom `z` covers the `2^(max_zoom - z)` square of finest
    /// cells below it. Points come out cell by cell, x-major.
    pub fn points_in_tile(&self, tile: TileCoord) -> Vec<usize> {
        if tile.zoom > self.max_zoom {
            return Vec::new();
        }
        let shift = self.max_zoom - tile.zoom;
        let (x0, y0) = (tile.x << shift, tile.y << shift);
        let (x1, y1) = ((tile.x + 1) << shift, (tile.y + 1) << shift);

        let mut members = Vec::new();
        let end = (x1, 0);
        let mut cursor = (x0, y0);
        while cursor < end {
            let Some((&(cx, cy), points)) = self.cells.range(cursor..end).next() else {
                break;
            };
            if cy < y0 {
                cursor = (cx, y0);
            } else if cy >= y1 {
                cursor = (cx + 1, y0);
            } else {
                members.extend_from_slice(points);
                cursor = (cx, cy + 1);
            }
        }
        members
    }
}
