//! K-means with optionally pinned centroids.

use super::{nearest, squared_distance};
use crate::config::ClusteringConfig;
use crate::error::{QuadmapError, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// K-means whose first `m` centroids can be fixed.
///
/// Without fixed centroids this is ordinary k-means with k-means++ seeding.
/// With fixed centroids, the pinned prefix is copied verbatim into every
/// result and only the remaining `k - m` centroids take part in Lloyd
/// updates.
///
/// # Examples
///
/// ```rust
/// use quadmap::cluster::ModifiedKMeans;
///
/// let data = [[0.0, 0.0], [0.1, 0.0], [5.0, 5.0], [5.1, 5.0]];
/// let fixed = [[0.0, 0.0]];
/// let mut kmeans = ModifiedKMeans::new(2);
/// let centers = kmeans.fit(&data, Some(&fixed))?;
/// assert_eq!(centers[0], [0.0, 0.0]);
/// assert_eq!(kmeans.predict(&[5.0, 5.0])?, 1);
/// # Ok::<(), quadmap::QuadmapError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ModifiedKMeans {
    n_clusters: usize,
    max_iter: usize,
    n_init: usize,
    seed: u64,
    centers: Vec<[f64; 2]>,
    inertia: f64,
}

impl ModifiedKMeans {
    pub fn new(n_clusters: usize) -> Self {
        let defaults = ClusteringConfig::default();
        Self {
            n_clusters,
            max_iter: defaults.max_iter,
            n_init: defaults.n_init,
            seed: defaults.seed,
            centers: Vec::new(),
            inertia: f64::INFINITY,
        }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.number_of_clusters)
            .with_max_iter(config.max_iter)
            .with_n_init(config.n_init)
            .with_seed(config.seed)
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Centroids of the last successful fit.
    pub fn centers(&self) -> &[[f64; 2]] {
        &self.centers
    }

    /// Sum of squared distances to the nearest centroid for the last fit.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Fit `n_clusters` centroids to `data`, keeping `fixed` (if any) as the
    /// leading centroids.
    ///
    /// Each of the `n_init` runs seeds the free centroids, then iterates
    /// Lloyd updates on them until nothing moves or `max_iter` is reached.
    /// The run with the lowest non-zero inertia wins; if every run reaches
    /// zero inertia the last one is kept.
    pub fn fit(&mut self, data: &[[f64; 2]], fixed: Option<&[[f64; 2]]>) -> Result<&[[f64; 2]]> {
        self.validate(data, fixed)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let pinned = fixed.map_or(0, <[_]>::len);
        let deterministic = fixed.is_some() && self.n_init == 1;

        let mut best: Option<(Vec<[f64; 2]>, f64)> = None;
        let mut degenerate: Option<Vec<[f64; 2]>> = None;

        for _ in 0..self.n_init {
            let mut centers = self.initial_centers(data, fixed.unwrap_or(&[]), deterministic, &mut rng);
            let iterations = self.lloyd(data, &mut centers, pinned, &mut rng);
            let inertia = total_inertia(data, &centers);
            log::trace!(
                "k-means run: {} points, {} pinned, {} iterations, inertia {}",
                data.len(),
                pinned,
                iterations,
                inertia
            );

            if inertia > 0.0 {
                if best.as_ref().is_none_or(|(_, b)| inertia < *b) {
                    best = Some((centers, inertia));
                }
            } else {
                degenerate = Some(centers);
            }
        }

        let (centers, inertia) = match (best, degenerate) {
            (Some(best), _) => best,
            (None, Some(centers)) => (centers, 0.0),
            (None, None) => {
                return Err(QuadmapError::Clustering(
                    "no k-means run produced centroids".to_string(),
                ));
            }
        };

        if !inertia.is_finite() {
            return Err(QuadmapError::Clustering(format!(
                "k-means diverged (inertia {})",
                inertia
            )));
        }

        self.centers = centers;
        self.inertia = inertia;
        Ok(&self.centers)
    }

    /// Index of the centroid nearest to `point`; ties go to the lowest index.
    pub fn predict(&self, point: &[f64; 2]) -> Result<usize> {
        nearest(&self.centers, point)
            .map(|(i, _)| i)
            .ok_or_else(|| QuadmapError::Clustering("model has not been fitted".to_string()))
    }

    fn validate(&self, data: &[[f64; 2]], fixed: Option<&[[f64; 2]]>) -> Result<()> {
        if data.is_empty() {
            return Err(QuadmapError::Clustering("no points to cluster".to_string()));
        }
        if self.n_clusters == 0 {
            return Err(QuadmapError::Clustering(
                "number of clusters must be greater than zero".to_string(),
            ));
        }
        if self.n_init == 0 || self.max_iter == 0 {
            return Err(QuadmapError::Clustering(
                "n_init and max_iter must be greater than zero".to_string(),
            ));
        }
        if data.len() < self.n_clusters {
            return Err(QuadmapError::Clustering(format!(
                "{} points cannot form {} clusters",
                data.len(),
                self.n_clusters
            )));
        }
        let fixed = fixed.unwrap_or(&[]);
        if fixed.len() > self.n_clusters {
            return Err(QuadmapError::Clustering(format!(
                "{} fixed centers exceed {} clusters",
                fixed.len(),
                self.n_clusters
            )));
        }
        if data.iter().chain(fixed).flatten().any(|c| !c.is_finite()) {
            return Err(QuadmapError::Clustering(
                "non-finite coordinates".to_string(),
            ));
        }
        Ok(())
    }

    /// Fixed prefix followed by centroids chosen by distance to the nearest
    /// centroid so far: the farthest point when `deterministic`, otherwise a
    /// draw weighted by squared distance.
    fn initial_centers(
        &self,
        data: &[[f64; 2]],
        fixed: &[[f64; 2]],
        deterministic: bool,
        rng: &mut StdRng,
    ) -> Vec<[f64; 2]> {
        let mut centers = Vec::with_capacity(self.n_clusters);
        centers.extend_from_slice(fixed);
        if centers.is_empty() {
            centers.push(data[rng.gen_range(0..data.len())]);
        }

        let mut distances: Vec<f64> = data
            .iter()
            .map(|p| nearest(&centers, p).map_or(f64::INFINITY, |(_, d)| d))
            .collect();

        while centers.len() < self.n_clusters {
            let chosen = if deterministic {
                argmax(&distances)
            } else {
                match WeightedIndex::new(&distances) {
                    Ok(weights) => weights.sample(rng),
                    // Every point already sits on a centroid.
                    Err(_) => rng.gen_range(0..data.len()),
                }
            };
            let center = data[chosen];
            centers.push(center);
            for (distance, point) in distances.iter_mut().zip(data) {
                *distance = distance.min(squared_distance(&center, point));
            }
        }
        centers
    }

    /// Lloyd iterations over the centroids from `pinned` onwards. Returns the
    /// number of iterations run.
    fn lloyd(
        &self,
        data: &[[f64; 2]],
        centers: &mut [[f64; 2]],
        pinned: usize,
        rng: &mut StdRng,
    ) -> usize {
        let k = centers.len();
        let mut sums = vec![[0.0f64; 2]; k];
        let mut counts = vec![0usize; k];

        for iteration in 1..=self.max_iter {
            sums.fill([0.0, 0.0]);
            counts.fill(0);
            for point in data {
                if let Some((label, _)) = nearest(centers, point) {
                    sums[label][0] += point[0];
                    sums[label][1] += point[1];
                    counts[label] += 1;
                }
            }

            let mut moved = false;
            for j in pinned..k {
                let updated = if counts[j] == 0 {
                    data[rng.gen_range(0..data.len())]
                } else {
                    let n = counts[j] as f64;
                    [sums[j][0] / n, sums[j][1] / n]
                };
                if updated != centers[j] {
                    centers[j] = updated;
                    moved = true;
                }
            }

            if !moved {
                return iteration;
            }
        }
        self.max_iter
    }
}

fn total_inertia(data: &[[f64; 2]], centers: &[[f64; 2]]) -> f64 {
    data.iter()
        .filter_map(|p| nearest(centers, p).map(|(_, d)| d))
        .sum()
}

/// Position of the largest value; the first one on ties.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
