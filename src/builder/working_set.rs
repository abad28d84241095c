//! Tiles resident in memory during a build.
//!
//! The working set is an ordered table keyed by [`TileCoord`], so "every
//! tile before X" and "column x of zoom z" are contiguous key ranges and
//! eviction is a range delete.

use super::budget::ResidentBudget;
use crate::error::{QuadmapError, Result};
use crate::tile::TileState;
use quadmap_types::TileCoord;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct WorkingSet {
    tiles: BTreeMap<TileCoord, TileState>,
    budget: ResidentBudget,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident tiles.
    pub fn len(&self) -> usize {
        self.budget.current()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn budget(&self) -> &ResidentBudget {
        &self.budget
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        self.tiles.contains_key(coord)
    }

    pub fn get(&self, coord: &TileCoord) -> Option<&TileState> {
        self.tiles.get(coord)
    }

    pub fn insert(&mut self, coord: TileCoord, state: TileState) {
        if self.tiles.insert(coord, state).is_none() {
            self.budget.reserve(coord.zoom, 1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileCoord, &TileState)> {
        self.tiles.iter()
    }

    /// Coordinates of tiles not yet written to storage, in build order.
    pub fn active(&self) -> Vec<TileCoord> {
        self.tiles
            .iter()
            .filter(|(_, state)| !state.already_inserted)
            .map(|(coord, _)| *coord)
            .collect()
    }

    pub fn mark_flushed(&mut self, coords: &[TileCoord]) {
        for coord in coords {
            if let Some(state) = self.tiles.get_mut(coord) {
                state.already_inserted = true;
            }
        }
    }

    /// Up to `limit` non-resident tiles of `start`'s level, walking row-major
    /// from `start` itself.
    pub fn missing_from(&self, start: TileCoord, limit: usize) -> Vec<TileCoord> {
        std::iter::successors(Some(start), TileCoord::next_in_level)
            .filter(|coord| !self.contains(coord))
            .take(limit)
            .collect()
    }

    /// Shrink the working set to at most `keep` tiles before building `next`.
    ///
    /// Everything two or more levels above `next` goes first, then the
    /// parent level's tiles that no unbuilt tile needs: those before
    /// `next`'s parent when `next.x` is odd, those before the parent's
    /// column when it is even (column `next.x + 1` still starts at `y = 0`).
    /// If that is not enough, whole columns of `next`'s level are dropped
    /// from the highest `x` down, and finally whole columns of the parent
    /// level. Only flushed tiles may be evicted.
    pub fn evict(&mut self, next: TileCoord, keep: usize) -> Result<usize> {
        let zoom = next.zoom;
        let mut removed = 0;

        if let Some(parent) = next.parent() {
            let first_needed = if next.x % 2 == 1 {
                parent
            } else {
                TileCoord::new(parent.zoom, parent.x, 0)
            };
            removed += self.remove_range(TileCoord::ROOT, TileCoord::new(parent.zoom, 0, 0))?;
            removed += self.remove_range(TileCoord::new(parent.zoom, 0, 0), first_needed)?;
        }

        while self.len() > keep {
            match self.remove_last_column(zoom)? {
                0 => break,
                n => removed += n,
            }
        }

        if zoom > 0 {
            while self.len() > keep {
                match self.remove_last_column(zoom - 1)? {
                    0 => break,
                    n => removed += n,
                }
            }
        }

        if self.len() > keep {
            log::warn!(
                "{} tiles still resident after eviction (keep limit {})",
                self.len(),
                keep
            );
        }
        log::debug!(
            "Evicted {} tiles before {}; {} resident",
            removed,
            next,
            self.len()
        );
        Ok(removed)
    }

    /// Drop the highest-`x` column of `zoom` that still has resident tiles.
    fn remove_last_column(&mut self, zoom: u32) -> Result<usize> {
        let last = self
            .tiles
            .range(TileCoord::new(zoom, 0, 0)..TileCoord::new(zoom + 1, 0, 0))
            .next_back()
            .map(|(coord, _)| coord.x);
        match last {
            Some(x) => self.remove_range(TileCoord::new(zoom, x, 0), TileCoord::new(zoom, x + 1, 0)),
            None => Ok(0),
        }
    }

    /// Remove every tile in `[start, end)`.
    fn remove_range(&mut self, start: TileCoord, end: TileCoord) -> Result<usize> {
        if start >= end {
            return Ok(0);
        }
        if let Some((coord, _)) = self
            .tiles
            .range(start..end)
            .find(|(_, state)| !state.already_inserted)
        {
            return Err(QuadmapError::Invariant(format!(
                "tile {} would be evicted before it was flushed",
                coord
            )));
        }

        let mut evicted = self.tiles.split_off(&start);
        let mut rest = evicted.split_off(&end);
        self.tiles.append(&mut rest);

        for coord in evicted.keys() {
            self.budget.release(coord.zoom, 1);
        }
        Ok(evicted.len())
    }
}
