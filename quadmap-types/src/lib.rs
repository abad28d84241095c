//! # quadmap-types
//!
//! Core addressing and geometry types shared by the quadmap tiler and its
//! serving layer:
//!
//! - **Tile addressing**: `TileCoord` and the global linear tile index
//! - **Bounding boxes**: `BoundingBox2D` (built on `geo::Rect`) and the
//!   serialized `TileRange`
//!
//! ## Examples
//!
//! ```rust
//! use quadmap_types::tile::TileCoord;
//!
//! let tile = TileCoord::new(2, 1, 3);
//! assert_eq!(tile.index(), 1 + 4 + 4 * 1 + 3);
//! assert_eq!(TileCoord::from_index(tile.index()), Some(tile));
//! ```

pub mod bbox;
pub mod tile;

pub use bbox::{BoundingBox2D, TileRange};
pub use tile::{MAX_ZOOM, TileCoord};
