use geo::Rect;
use serde::{Deserialize, Serialize};

/// A 2D axis-aligned bounding box over embedding coordinates.
///
/// This is a wrapper around `geo::Rect` with the helpers the tiler needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox2D {
    /// The underlying geometric rectangle
    pub rect: Rect,
}

impl BoundingBox2D {
    /// Create a new bounding box from minimum and maximum coordinates.
    ///
    /// # Examples
    ///
    /// ```
    /// use quadmap_types::bbox::BoundingBox2D;
    ///
    /// let bbox = BoundingBox2D::new(0.0, 0.0, 2.0, 1.0);
    /// assert_eq!(bbox.width(), 2.0);
    /// ```
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            rect: Rect::new(
                geo::coord! { x: min_x, y: min_y },
                geo::coord! { x: max_x, y: max_y },
            ),
        }
    }

    /// Smallest box containing every `(x, y)` pair, or `None` for no pairs.
    pub fn from_coords<I>(coords: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = coords.into_iter();
        let (x, y) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Self::new(min_x, min_y, max_x, max_y))
    }

    pub fn min_x(&self) -> f64 {
        self.rect.min().x
    }

    pub fn min_y(&self) -> f64 {
        self.rect.min().y
    }

    pub fn max_x(&self) -> f64 {
        self.rect.max().x
    }

    pub fn max_y(&self) -> f64 {
        self.rect.max().y
    }

    pub fn width(&self) -> f64 {
        self.max_x() - self.min_x()
    }

    pub fn height(&self) -> f64 {
        self.max_y() - self.min_y()
    }

    /// Check if a coordinate is contained within this bounding box.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x() && x <= self.max_x() && y >= self.min_y() && y <= self.max_y()
    }

    /// Index of the grid cell holding `(x, y)` when the box is split into
    /// `cells × cells` equal cells.
    ///
    /// Zero-extent axes count as extent 1, and coordinates on the upper edge
    /// fall into the last cell.
    pub fn cell_of(&self, x: f64, y: f64, cells: u64) -> (u32, u32) {
        (
            axis_cell(x - self.min_x(), self.width(), cells),
            axis_cell(y - self.min_y(), self.height(), cells),
        )
    }
}

fn axis_cell(offset: f64, extent: f64, cells: u64) -> u32 {
    let extent = if extent > 0.0 { extent } else { 1.0 };
    let last = cells.saturating_sub(1);
    let cell = ((offset * cells as f64) / extent).floor();
    if cell <= 0.0 {
        0
    } else {
        (cell as u64).min(last) as u32
    }
}

/// Coordinate range persisted with the root tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileRange {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl From<BoundingBox2D> for TileRange {
    fn from(bbox: BoundingBox2D) -> Self {
        Self {
            x_min: bbox.min_x(),
            x_max: bbox.max_x(),
            y_min: bbox.min_y(),
            y_max: bbox.max_y(),
        }
    }
}

impl From<TileRange> for BoundingBox2D {
    fn from(range: TileRange) -> Self {
        BoundingBox2D::new(range.x_min, range.y_min, range.x_max, range.y_max)
    }
}
