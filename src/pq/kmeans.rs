//! K-means clustering for product quantization
//!
//! Operates on row-major `f32` buffers. Each PQ subspace is clustered
//! independently, so the inputs here are the sub-vectors of one subspace.

use crate::distance::scalar::l2_squared;
use crate::{Error, Result};
use rand::prelude::*;
use rand::seq::index::sample;

/// K-means clustering parameters
#[derive(Debug, Clone)]
pub struct KMeansParams {
    /// Number of clusters (centroids)
    pub k: usize,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence tolerance on the change in inertia
    pub tolerance: f32,
    /// Random seed for reproducible results
    pub seed: u64,
    /// Use K-means++ initialization instead of sampling distinct points
    pub use_plus_plus_init: bool,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            k: 256,
            max_iterations: 25,
            tolerance: 1e-4,
            seed: 1234,
            use_plus_plus_init: false,
        }
    }
}

/// K-means clustering result
#[derive(Debug)]
pub struct KMeansResult {
    /// Cluster centroids, row-major [k x dimension]
    pub centroids: Vec<f32>,
    /// Assignment of each point to cluster
    pub assignments: Vec<usize>,
    /// Final inertia (sum of squared distances to centroids)
    pub inertia: f32,
    /// Number of iterations performed
    pub iterations: usize,
    /// Whether convergence was achieved
    pub converged: bool,
}

/// Lloyd's k-means
pub struct KMeans {
    params: KMeansParams,
    dimension: usize,
    rng: StdRng,
}

impl KMeans {
    /// Create a new K-means clusterer
    pub fn new(params: KMeansParams, dimension: usize) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        Self {
            params,
            dimension,
            rng,
        }
    }

    /// Fit K-means to row-major `data`
    ///
    /// With fewer points than clusters, the points themselves become the
    /// centroids, repeated in order until `k` centroids exist.
    pub fn fit(&mut self, data: &[f32]) -> Result<KMeansResult> {
        let dim = self.dimension;
        let k = self.params.k;

        if dim == 0 || k == 0 {
            return Err(Error::TrainingFailed(format!(
                "k-means needs positive k and dimension (k={}, dimension={})",
                k, dim
            )));
        }
        if data.len() % dim != 0 {
            return Err(Error::TrainingFailed(format!(
                "Buffer of {} floats is not a multiple of dimension {}",
                data.len(),
                dim
            )));
        }

        let n_points = data.len() / dim;
        if n_points == 0 {
            return Err(Error::TrainingFailed("Cannot cluster empty dataset".to_string()));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::TrainingFailed("Training data contains NaN or infinite values".to_string()));
        }

        if n_points <= k {
            if n_points < k {
                log::warn!(
                    "Only {} training points for {} clusters; centroids will repeat training points",
                    n_points, k
                );
            }
            return Ok(self.degenerate(data, n_points));
        }

        let mut centroids = if self.params.use_plus_plus_init {
            self.init_plus_plus(data, n_points)
        } else {
            self.init_random(data, n_points)
        };

        let mut assignments = vec![usize::MAX; n_points];
        let mut prev_inertia = f32::INFINITY;

        for iteration in 0..self.params.max_iterations {
            // Assignment step
            let mut sum = 0.0f64;
            let mut changed = false;
            for (point_idx, point) in data.chunks_exact(dim).enumerate() {
                let (closest, distance) = closest_centroid(point, &centroids, dim);
                if assignments[point_idx] != closest {
                    assignments[point_idx] = closest;
                    changed = true;
                }
                sum += distance as f64;
            }
            let inertia = sum as f32;

            if !changed || (prev_inertia - inertia).abs() < self.params.tolerance {
                return Ok(KMeansResult {
                    centroids,
                    assignments,
                    inertia,
                    iterations: iteration + 1,
                    converged: true,
                });
            }

            // Update step
            centroids = self.update_centroids(data, &assignments);
            prev_inertia = inertia;
        }

        // Budget exhausted: assign against the final centroids
        let assignments = self.predict(data, &centroids);
        let inertia = self.calculate_inertia(data, &centroids, &assignments);

        Ok(KMeansResult {
            centroids,
            assignments,
            inertia,
            iterations: self.params.max_iterations,
            converged: false,
        })
    }

    /// Centroids for `n_points <= k`
    fn degenerate(&self, data: &[f32], n_points: usize) -> KMeansResult {
        let dim = self.dimension;
        let mut centroids = Vec::with_capacity(self.params.k * dim);
        for c in 0..self.params.k {
            let p = c % n_points;
            centroids.extend_from_slice(&data[p * dim..(p + 1) * dim]);
        }

        KMeansResult {
            centroids,
            assignments: (0..n_points).collect(),
            inertia: 0.0,
            iterations: 0,
            converged: true,
        }
    }

    /// Pick `k` distinct points uniformly at random
    fn init_random(&mut self, data: &[f32], n_points: usize) -> Vec<f32> {
        let dim = self.dimension;
        let mut picked = sample(&mut self.rng, n_points, self.params.k).into_vec();
        picked.sort_unstable();

        let mut centroids = Vec::with_capacity(self.params.k * dim);
        for idx in picked {
            centroids.extend_from_slice(&data[idx * dim..(idx + 1) * dim]);
        }
        centroids
    }

    /// K-means++ seeding
    fn init_plus_plus(&mut self, data: &[f32], n_points: usize) -> Vec<f32> {
        let dim = self.dimension;
        let mut centroids = Vec::with_capacity(self.params.k * dim);

        let first = self.rng.gen_range(0..n_points);
        centroids.extend_from_slice(&data[first * dim..(first + 1) * dim]);

        // Squared distance from every point to its nearest chosen centroid
        let mut min_dist: Vec<f32> = data
            .chunks_exact(dim)
            .map(|p| l2_squared(p, &centroids[..dim]))
            .collect();

        for _ in 1..self.params.k {
            let total: f64 = min_dist.iter().map(|&d| d as f64).sum();

            let chosen = if total <= 0.0 {
                self.rng.gen_range(0..n_points)
            } else {
                let target = self.rng.gen::<f64>() * total;
                let mut cumulative = 0.0f64;
                let mut chosen = n_points - 1;
                for (idx, &d) in min_dist.iter().enumerate() {
                    cumulative += d as f64;
                    if cumulative >= target {
                        chosen = idx;
                        break;
                    }
                }
                chosen
            };

            let new_centroid = data[chosen * dim..(chosen + 1) * dim].to_vec();
            for (d, point) in min_dist.iter_mut().zip(data.chunks_exact(dim)) {
                *d = d.min(l2_squared(point, &new_centroid));
            }
            centroids.extend_from_slice(&new_centroid);
        }

        centroids
    }

    /// Update centroids as the mean of assigned points
    fn update_centroids(&mut self, data: &[f32], assignments: &[usize]) -> Vec<f32> {
        let dim = self.dimension;
        let k = self.params.k;
        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0usize; k];

        for (point, &cluster) in data.chunks_exact(dim).zip(assignments.iter()) {
            counts[cluster] += 1;
            for (s, &v) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(point) {
                *s += v as f64;
            }
        }

        let n_points = data.len() / dim;
        let mut centroids = vec![0.0f32; k * dim];
        for cluster in 0..k {
            let out = &mut centroids[cluster * dim..(cluster + 1) * dim];
            if counts[cluster] == 0 {
                // Empty cluster: restart from a random point
                let p = self.rng.gen_range(0..n_points);
                out.copy_from_slice(&data[p * dim..(p + 1) * dim]);
            } else {
                let count = counts[cluster] as f64;
                for (o, s) in out.iter_mut().zip(&sums[cluster * dim..(cluster + 1) * dim]) {
                    *o = (s / count) as f32;
                }
            }
        }

        centroids
    }

    /// Predict cluster assignments for new data
    pub fn predict(&self, data: &[f32], centroids: &[f32]) -> Vec<usize> {
        data.chunks_exact(self.dimension)
            .map(|point| closest_centroid(point, centroids, self.dimension).0)
            .collect()
    }

    /// Calculate inertia (within-cluster sum of squares)
    pub fn calculate_inertia(&self, data: &[f32], centroids: &[f32], assignments: &[usize]) -> f32 {
        let dim = self.dimension;
        data.chunks_exact(dim)
            .zip(assignments)
            .map(|(point, &c)| l2_squared(point, &centroids[c * dim..(c + 1) * dim]) as f64)
            .sum::<f64>() as f32
    }
}

/// Nearest centroid by squared L2, returns (index, squared distance)
pub fn closest_centroid(point: &[f32], centroids: &[f32], dimension: usize) -> (usize, f32) {
    let mut min_distance = f32::INFINITY;
    let mut closest_idx = 0;

    for (idx, centroid) in centroids.chunks_exact(dimension).enumerate() {
        let distance = l2_squared(point, centroid);
        if distance < min_distance {
            min_distance = distance;
            closest_idx = idx;
        }
    }

    (closest_idx, min_distance)
}
