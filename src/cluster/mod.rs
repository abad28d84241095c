//! Clustering used to pick tile representatives.
//!
//! [`ModifiedKMeans`] is plain k-means with one extension: a prefix of the
//! centroids can be pinned to given coordinates. The zoom level builder pins
//! the representatives inherited from a parent tile so they survive into the
//! child unchanged.

pub mod kmeans;

pub use kmeans::ModifiedKMeans;

/// Squared Euclidean distance between two 2-D points.
#[inline]
pub fn squared_distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Index of the centroid nearest to `point` and its squared distance.
///
/// Ties go to the lowest index. Returns `None` for an empty centroid list.
pub fn nearest(centers: &[[f64; 2]], point: &[f64; 2]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, center) in centers.iter().enumerate() {
        let distance = squared_distance(center, point);
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((i, distance)),
        }
    }
    best
}
