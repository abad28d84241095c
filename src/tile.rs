//! Tile state held by the builder and the records persisted for it.

use crate::error::{QuadmapError, Result};
use crate::points::PointStore;
use quadmap_types::{TileCoord, TileRange};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A point chosen to stand for part of a tile.
///
/// `position` refers to the point's slot in the [`PointStore`] the tile was
/// built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Representative {
    pub position: usize,
    /// Non-representative points this one absorbed
    pub number_of_entities: usize,
    /// Inherited from the parent tile
    pub in_previous: bool,
}

impl Representative {
    pub fn new(position: usize, number_of_entities: usize, in_previous: bool) -> Self {
        Self {
            position,
            number_of_entities,
            in_previous,
        }
    }

    /// Points this representative stands for, itself included.
    pub fn weight(&self) -> usize {
        self.number_of_entities + 1
    }
}

/// In-memory state of one tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileState {
    pub representatives: Vec<Representative>,
    /// Coordinate range of all points; set on the root tile only
    pub range: Option<TileRange>,
    /// Whether the tile has been written to storage
    pub already_inserted: bool,
}

impl TileState {
    pub fn new(representatives: Vec<Representative>) -> Self {
        Self {
            representatives,
            range: None,
            already_inserted: false,
        }
    }

    /// Points covered by the tile's representatives.
    pub fn covered_points(&self) -> usize {
        self.representatives.iter().map(Representative::weight).sum()
    }

    /// Persisted form of this tile. Every representative must already have a
    /// first-seen tile in `first_seen`.
    pub fn to_record(
        &self,
        coord: TileCoord,
        store: &PointStore,
        first_seen: &FxHashMap<u64, TileCoord>,
    ) -> Result<TileRecord> {
        let data = self
            .representatives
            .iter()
            .map(|rep| {
                let point = store.get(rep.position).ok_or_else(|| {
                    QuadmapError::Invariant(format!(
                        "tile {} references unknown point position {}",
                        coord, rep.position
                    ))
                })?;
                let seen = first_seen.get(&point.index).ok_or_else(|| {
                    QuadmapError::Invariant(format!(
                        "representative {} of tile {} was never recorded",
                        point.index, coord
                    ))
                })?;
                Ok(RepresentativeRecord {
                    index: point.index,
                    path: point.path.clone(),
                    x: point.x,
                    y: point.y,
                    width: point.width,
                    height: point.height,
                    zoom: seen.zoom,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TileRecord {
            index: coord.index(),
            tile: coord,
            data,
            range: self.range,
        })
    }

    /// Rebuild a flushed tile from its record.
    ///
    /// Only the representatives' identities survive a round trip through
    /// storage: entity counts come back as zero and nothing is marked as
    /// inherited, which is all a child tile needs from its parent.
    pub fn from_record(record: &TileRecord, store: &PointStore) -> Result<Self> {
        let representatives = record
            .data
            .iter()
            .map(|entry| {
                store
                    .position_of(entry.index)
                    .map(|position| Representative::new(position, 0, false))
                    .ok_or_else(|| {
                        QuadmapError::Storage(format!(
                            "tile {} references image {} which is not in the dataset",
                            record.tile, entry.index
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            representatives,
            range: record.range,
            already_inserted: true,
        })
    }
}

/// Tile as stored in `<dataset>_zoom_levels_clusters`, keyed by `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub index: u64,
    pub tile: TileCoord,
    pub data: Vec<RepresentativeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TileRange>,
}

/// One representative inside a [`TileRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeRecord {
    pub index: u64,
    pub path: String,
    pub x: f64,
    pub y: f64,
    pub width: u32,
    pub height: u32,
    /// Zoom at which the image first became a representative
    pub zoom: u32,
}

/// Entry of `<dataset>_image_to_tile`, keyed by `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageToTileRecord {
    pub index: u64,
    pub tile: TileCoord,
}
