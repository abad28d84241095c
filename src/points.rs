//! Projected image points.
//!
//! A [`PointStore`] holds one [`ImagePoint`] per image of a dataset. It is
//! built once from the embeddings collection and never mutated afterwards;
//! the tiler and the zoom level builder address points by their position in
//! the store, and everything persisted refers to them by `index`.

use crate::error::{QuadmapError, Result};
use quadmap_types::BoundingBox2D;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One image projected into the 2-D embedding space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePoint {
    /// Stable identifier of the image within its dataset
    pub index: u64,
    pub path: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Fields the pipeline carries without interpreting
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImagePoint {
    pub fn new(index: u64, path: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            index,
            path: path.into(),
            x,
            y,
            width: 0,
            height: 0,
            caption: None,
            extra: Map::new(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    #[inline]
    pub fn coords(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Immutable set of points with O(1) lookup by image index.
#[derive(Debug, Clone)]
pub struct PointStore {
    points: Vec<ImagePoint>,
    positions: FxHashMap<u64, usize>,
    bounds: BoundingBox2D,
}

impl PointStore {
    /// Build a store, rejecting empty input, non-finite coordinates and
    /// duplicate indexes.
    pub fn new(points: Vec<ImagePoint>) -> Result<Self> {
        let bounds = BoundingBox2D::from_coords(points.iter().map(|p| (p.x, p.y)))
            .ok_or_else(|| QuadmapError::InvalidInput("no points to tile".to_string()))?;

        let mut positions = FxHashMap::default();
        positions.reserve(points.len());
        for (position, point) in points.iter().enumerate() {
            if !point.x.is_finite() || !point.y.is_finite() {
                return Err(QuadmapError::InvalidInput(format!(
                    "image {} has non-finite coordinates ({}, {})",
                    point.index, point.x, point.y
                )));
            }
            if positions.insert(point.index, position).is_some() {
                return Err(QuadmapError::InvalidInput(format!(
                    "image index {} appears more than once",
                    point.index
                )));
            }
        }

        Ok(Self {
            points,
            positions,
            bounds,
        })
    }

    /// Same points in an order fixed by `seed`.
    pub fn shuffled(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.points.shuffle(&mut rng);
        for (position, point) in self.points.iter().enumerate() {
            self.positions.insert(point.index, position);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point at a store position.
    pub fn get(&self, position: usize) -> Option<&ImagePoint> {
        self.points.get(position)
    }

    /// Point with the given image index.
    pub fn by_index(&self, index: u64) -> Option<&ImagePoint> {
        self.position_of(index).map(|position| &self.points[position])
    }

    pub fn position_of(&self, index: u64) -> Option<usize> {
        self.positions.get(&index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImagePoint> {
        self.points.iter()
    }

    pub fn bounding_box(&self) -> BoundingBox2D {
        self.bounds
    }
}

impl std::ops::Index<usize> for PointStore {
    type Output = ImagePoint;

    fn index(&self, position: usize) -> &Self::Output {
        &self.points[position]
    }
}
