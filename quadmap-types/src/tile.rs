use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Deepest zoom level whose global indexes still fit in a `u64`.
pub const MAX_ZOOM: u32 = 31;

/// Address of one quadtree tile.
///
/// Zoom 0 is the root tile covering the whole embedding space; every level
/// down splits each tile into four, so zoom `z` is a `2^z × 2^z` grid.
///
/// Ordering is lexicographic on `(zoom, x, y)`, which is also the order in
/// which tiles are built and the order of their global indexes.
///
/// # Examples
///
/// ```
/// use quadmap_types::tile::TileCoord;
///
/// let child = TileCoord::new(3, 5, 2);
/// assert_eq!(child.parent(), Some(TileCoord::new(2, 2, 1)));
/// assert!(child.parent().unwrap().children().contains(&child));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 3]", into = "[u32; 3]")]
pub struct TileCoord {
    pub zoom: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub const ROOT: TileCoord = TileCoord { zoom: 0, x: 0, y: 0 };

    pub const fn new(zoom: u32, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Number of tiles along each axis at `zoom`.
    pub const fn tiles_per_axis(zoom: u32) -> u64 {
        1u64 << zoom
    }

    /// First global index used by `zoom`: `sum(4^i for i < zoom)`.
    pub const fn zoom_offset(zoom: u32) -> u64 {
        (((1u128 << (2 * zoom)) - 1) / 3) as u64
    }

    /// The contiguous block of global indexes owned by `zoom`.
    pub const fn zoom_index_range(zoom: u32) -> Range<u64> {
        Self::zoom_offset(zoom)..Self::zoom_offset(zoom + 1)
    }

    /// Whether the coordinate lies inside its zoom level's grid.
    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_ZOOM
            && u64::from(self.x) < Self::tiles_per_axis(self.zoom)
            && u64::from(self.y) < Self::tiles_per_axis(self.zoom)
    }

    /// Global linear index: `sum(4^i for i < zoom) + 2^zoom * x + y`.
    pub fn index(&self) -> u64 {
        Self::zoom_offset(self.zoom)
            + Self::tiles_per_axis(self.zoom) * u64::from(self.x)
            + u64::from(self.y)
    }

    /// Inverse of [`TileCoord::index`].
    pub fn from_index(index: u64) -> Option<Self> {
        let zoom = (0..=MAX_ZOOM).find(|&z| Self::zoom_index_range(z).contains(&index))?;
        let local = index - Self::zoom_offset(zoom);
        let mask = Self::tiles_per_axis(zoom) - 1;
        Some(Self::new(zoom, (local >> zoom) as u32, (local & mask) as u32))
    }

    pub fn parent(&self) -> Option<Self> {
        if self.zoom == 0 {
            return None;
        }
        Some(Self::new(self.zoom - 1, self.x / 2, self.y / 2))
    }

    /// The four tiles one level down, in build order.
    pub fn children(&self) -> [Self; 4] {
        let (zoom, x, y) = (self.zoom + 1, self.x * 2, self.y * 2);
        [
            Self::new(zoom, x, y),
            Self::new(zoom, x, y + 1),
            Self::new(zoom, x + 1, y),
            Self::new(zoom, x + 1, y + 1),
        ]
    }

    /// Ancestor of this tile at a coarser `zoom`.
    pub fn ancestor_at(&self, zoom: u32) -> Option<Self> {
        if zoom > self.zoom {
            return None;
        }
        let shift = self.zoom - zoom;
        Some(Self::new(zoom, self.x >> shift, self.y >> shift))
    }

    /// All tiles of `zoom` in row-major build order.
    pub fn tiles_at(zoom: u32) -> impl Iterator<Item = TileCoord> {
        let n = Self::tiles_per_axis(zoom) as u32;
        (0..n).flat_map(move |x| (0..n).map(move |y| TileCoord::new(zoom, x, y)))
    }

    /// The tile processed right after this one within the same zoom level.
    pub fn next_in_level(&self) -> Option<Self> {
        let n = Self::tiles_per_axis(self.zoom);
        if u64::from(self.y) + 1 < n {
            Some(Self::new(self.zoom, self.x, self.y + 1))
        } else if u64::from(self.x) + 1 < n {
            Some(Self::new(self.zoom, self.x + 1, 0))
        } else {
            None
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl From<[u32; 3]> for TileCoord {
    fn from(value: [u32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<TileCoord> for [u32; 3] {
    fn from(value: TileCoord) -> Self {
        [value.zoom, value.x, value.y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_contiguous_per_zoom() {
        for zoom in 0..6 {
            let indexes: Vec<u64> = TileCoord::tiles_at(zoom).map(|t| t.index()).collect();
            let expected: Vec<u64> = TileCoord::zoom_index_range(zoom).collect();
            assert_eq!(indexes, expected, "zoom {zoom}");
        }
    }

    #[test]
    fn test_index_matches_summation_formula() {
        let tile = TileCoord::new(3, 6, 1);
        let offset: u64 = (0..3).map(|i| 4u64.pow(i)).sum();
        assert_eq!(tile.index(), offset + 8 * 6 + 1);
        assert_eq!(TileCoord::ROOT.index(), 0);
        assert_eq!(TileCoord::zoom_offset(5), 341);
        // First five levels in full: the "first tiles" ceiling.
        assert_eq!(TileCoord::zoom_offset(5) + 1024, 1365);
    }

    #[test]
    fn test_from_index_roundtrip_at_deep_zoom() {
        let tile = TileCoord::new(MAX_ZOOM, u32::MAX >> 1, 12345);
        assert!(tile.is_valid());
        assert_eq!(TileCoord::from_index(tile.index()), Some(tile));
    }

    #[test]
    fn test_children_and_parent() {
        let tile = TileCoord::new(1, 1, 0);
        let children = tile.children();
        assert_eq!(children.len(), 4);
        for child in children {
            assert_eq!(child.parent(), Some(tile));
            assert!(child.is_valid());
        }
        assert_eq!(TileCoord::ROOT.parent(), None);
        assert_eq!(
            TileCoord::new(4, 13, 6).ancestor_at(1),
            Some(TileCoord::new(1, 1, 0))
        );
    }

    #[test]
    fn test_next_in_level_walks_row_major() {
        let walked: Vec<TileCoord> =
            std::iter::successors(Some(TileCoord::new(1, 0, 0)), |t| t.next_in_level()).collect();
        let expected: Vec<TileCoord> = TileCoord::tiles_at(1).collect();
        assert_eq!(walked, expected);
    }

    #[test]
    fn test_serializes_as_triplet() {
        let json = serde_json::to_string(&TileCoord::new(2, 3, 1)).unwrap();
        assert_eq!(json, "[2,3,1]");
        let back: TileCoord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TileCoord::new(2, 3, 1));
    }
}
