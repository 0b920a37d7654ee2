//! Product quantizer implementation
//!
//! A vector of dimension `d` is split into `M` contiguous sub-vectors of
//! dimension `d / M`; each subspace gets its own codebook of `2^nbits`
//! centroids learned with k-means.

use crate::aggregate::TrainingSet;
use crate::distance::scalar::l2_squared;
use crate::pq::kmeans::{closest_centroid, KMeans, KMeansParams};
use crate::pq::Codebook;
use crate::{Distance, Error, Result};
use serde::{Deserialize, Serialize};

/// Largest supported code width; codes are stored one per byte
pub const MAX_BITS_PER_CODE: usize = 8;

/// Resolved structure of a product quantizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PQLayout {
    /// Vector dimension
    pub dimension: usize,
    /// Number of subspaces (M)
    pub num_subspaces: usize,
    /// Bits per sub-quantizer code
    pub bits_per_code: usize,
    /// Metric the codebook scores with
    pub metric: Distance,
}

impl PQLayout {
    /// Create and validate a layout
    pub fn new(dimension: usize, num_subspaces: usize, bits_per_code: usize, metric: Distance) -> Result<Self> {
        let layout = Self {
            dimension,
            num_subspaces,
            bits_per_code,
            metric,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Validate parameters against the vector dimension
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidConfig("Vector dimension must be positive".to_string()));
        }

        if self.num_subspaces == 0 {
            return Err(Error::InvalidConfig("Number of sub-quantizers must be positive".to_string()));
        }

        if self.dimension % self.num_subspaces != 0 {
            return Err(Error::InvalidConfig(format!(
                "Vector dimension ({}) must be divisible by number of sub-quantizers ({})",
                self.dimension, self.num_subspaces
            )));
        }

        if self.bits_per_code == 0 || self.bits_per_code > MAX_BITS_PER_CODE {
            return Err(Error::InvalidConfig(format!(
                "Bits per code must be between 1 and {}, got {}",
                MAX_BITS_PER_CODE, self.bits_per_code
            )));
        }

        Ok(())
    }

    /// Centroids per subspace (K = 2^nbits)
    pub fn num_centroids(&self) -> usize {
        1 << self.bits_per_code
    }

    /// Dimension of each sub-vector
    pub fn subspace_dimension(&self) -> usize {
        self.dimension / self.num_subspaces
    }
}

/// Product Quantizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    layout: PQLayout,
    /// Centroids, row-major [M x K x d/M]
    centroids: Vec<f32>,
    is_trained: bool,
}

impl ProductQuantizer {
    /// Create a new untrained product quantizer
    pub fn new(layout: PQLayout) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            layout,
            centroids: Vec::new(),
            is_trained: false,
        })
    }

    /// Rebuild the quantizer stored in a codebook
    pub fn from_codebook(codebook: &Codebook) -> Result<Self> {
        let pq: ProductQuantizer = bincode::deserialize(&codebook.blob)?;
        if pq.layout != codebook.layout {
            return Err(Error::Serialization(
                "Codebook blob disagrees with its declared layout".to_string(),
            ));
        }
        let expected = pq.layout.num_subspaces * pq.layout.num_centroids() * pq.layout.subspace_dimension();
        if !pq.is_trained || pq.centroids.len() != expected {
            return Err(Error::Serialization(format!(
                "Codebook blob holds {} centroid floats, expected {}",
                pq.centroids.len(),
                expected
            )));
        }
        Ok(pq)
    }

    /// Serialize into an opaque blob
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Structure of this quantizer
    pub fn layout(&self) -> &PQLayout {
        &self.layout
    }

    /// Whether `train` has completed
    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    /// Centroids of one subspace, row-major [K x d/M]
    pub fn subspace_centroids(&self, subspace: usize) -> &[f32] {
        let block = self.layout.num_centroids() * self.layout.subspace_dimension();
        &self.centroids[subspace * block..(subspace + 1) * block]
    }

    /// Train on every vector of the set, in order
    pub fn train(&mut self, data: &TrainingSet, iterations: usize, seed: u64) -> Result<PQTrainingResult> {
        if data.dimension() != self.layout.dimension {
            return Err(Error::TrainingFailed(format!(
                "Training vectors have dimension {}, quantizer expects {}",
                data.dimension(),
                self.layout.dimension
            )));
        }
        if data.is_empty() {
            return Err(Error::TrainingFailed("Cannot train on empty dataset".to_string()));
        }

        let training_start = std::time::Instant::now();
        let m = self.layout.num_subspaces;
        let dsub = self.layout.subspace_dimension();
        let k = self.layout.num_centroids();

        let mut centroids = Vec::with_capacity(m * k * dsub);
        let mut stats = PQTrainingResult {
            subspace_inertias: Vec::with_capacity(m),
            convergence_info: Vec::with_capacity(m),
            total_training_time: std::time::Duration::ZERO,
        };

        for subspace_idx in 0..m {
            let start_dim = subspace_idx * dsub;
            let mut subspace_data = Vec::with_capacity(data.len() * dsub);
            for vector in data.vectors() {
                subspace_data.extend_from_slice(&vector[start_dim..start_dim + dsub]);
            }

            let params = KMeansParams {
                k,
                max_iterations: iterations,
                seed: seed.wrapping_add(subspace_idx as u64),
                ..Default::default()
            };

            let result = KMeans::new(params, dsub).fit(&subspace_data)?;
            centroids.extend_from_slice(&result.centroids);
            stats.subspace_inertias.push(result.inertia);
            stats.convergence_info.push((result.iterations, result.converged, result.inertia));
        }

        self.centroids = centroids;
        self.is_trained = true;
        stats.total_training_time = training_start.elapsed();

        log::debug!(
            "Trained PQ{}x{} on {} vectors in {:?}",
            m,
            self.layout.bits_per_code,
            data.len(),
            stats.total_training_time
        );

        Ok(stats)
    }

    /// Encode one vector into `M` codes
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.check_vector(vector)?;

        let dsub = self.layout.subspace_dimension();
        Ok(vector
            .chunks_exact(dsub)
            .enumerate()
            .map(|(subspace, sub)| closest_centroid(sub, self.subspace_centroids(subspace), dsub).0 as u8)
            .collect())
    }

    /// Decode codes back to an approximate vector
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        self.check_codes(codes)?;

        let dsub = self.layout.subspace_dimension();
        let mut decoded = Vec::with_capacity(self.layout.dimension);
        for (subspace, &code) in codes.iter().enumerate() {
            let c = code as usize;
            decoded.extend_from_slice(&self.subspace_centroids(subspace)[c * dsub..(c + 1) * dsub]);
        }
        Ok(decoded)
    }

    /// Mean squared L2 reconstruction error over a set
    pub fn reconstruction_error(&self, data: &TrainingSet) -> Result<f32> {
        if data.is_empty() {
            return Ok(0.0);
        }

        let mut total = 0.0f64;
        for vector in data.vectors() {
            let decoded = self.decode(&self.encode(vector)?)?;
            total += l2_squared(vector, &decoded) as f64;
        }
        Ok((total / data.len() as f64) as f32)
    }

    /// Per-subspace lookup table of query-to-centroid scores, [M x K]
    pub fn distance_table(&self, query: &[f32]) -> Result<Vec<f32>> {
        self.check_vector(query)?;

        let dsub = self.layout.subspace_dimension();
        let mut table = Vec::with_capacity(self.layout.num_subspaces * self.layout.num_centroids());
        for (subspace, sub) in query.chunks_exact(dsub).enumerate() {
            for centroid in self.subspace_centroids(subspace).chunks_exact(dsub) {
                table.push(self.layout.metric.distance(sub, centroid));
            }
        }
        Ok(table)
    }

    /// Asymmetric distance from a query's table to an encoded vector
    pub fn asymmetric_distance(&self, table: &[f32], codes: &[u8]) -> Result<f32> {
        self.check_codes(codes)?;
        let k = self.layout.num_centroids();
        if table.len() != self.layout.num_subspaces * k {
            return Err(Error::InvalidConfig(format!(
                "Distance table has {} entries, expected {}",
                table.len(),
                self.layout.num_subspaces * k
            )));
        }

        Ok(codes
            .iter()
            .enumerate()
            .map(|(subspace, &code)| table[subspace * k + code as usize])
            .sum())
    }

    /// Mean absolute gap between asymmetric and exact distances
    ///
    /// The first `num_queries` vectors of `data` are scored against the codes
    /// of every vector in `data`.
    pub fn distance_estimation_error(&self, data: &TrainingSet, num_queries: usize) -> Result<f32> {
        let codes = data.vectors().map(|v| self.encode(v)).collect::<Result<Vec<_>>>()?;

        let mut total = 0.0f64;
        let mut pairs = 0usize;
        for query in data.vectors().take(num_queries) {
            let table = self.distance_table(query)?;
            for (vector, code) in data.vectors().zip(&codes) {
                let estimate = self.asymmetric_distance(&table, code)?;
                let exact = self.layout.metric.distance(query, vector);
                total += (estimate - exact).abs() as f64;
                pairs += 1;
            }
        }

        if pairs == 0 {
            return Ok(0.0);
        }
        Ok((total / pairs as f64) as f32)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if !self.is_trained {
            return Err(Error::InvalidConfig("Quantizer must be trained first".to_string()));
        }
        if vector.len() != self.layout.dimension {
            return Err(Error::InvalidConfig(format!(
                "Vector dimension {} doesn't match quantizer dimension {}",
                vector.len(),
                self.layout.dimension
            )));
        }
        Ok(())
    }

    fn check_codes(&self, codes: &[u8]) -> Result<()> {
        if !self.is_trained {
            return Err(Error::InvalidConfig("Quantizer must be trained first".to_string()));
        }
        if codes.len() != self.layout.num_subspaces {
            return Err(Error::InvalidConfig(format!(
                "Code length {} doesn't match number of sub-quantizers {}",
                codes.len(),
                self.layout.num_subspaces
            )));
        }
        if let Some(&bad) = codes.iter().find(|&&c| c as usize >= self.layout.num_centroids()) {
            return Err(Error::InvalidConfig(format!(
                "Invalid code {} (max {})",
                bad,
                self.layout.num_centroids() - 1
            )));
        }
        Ok(())
    }
}

/// Product quantization training statistics
#[derive(Debug)]
pub struct PQTrainingResult {
    /// Inertia (within-cluster sum of squares) for each subspace
    pub subspace_inertias: Vec<f32>,
    /// Convergence information (iterations, converged, final_inertia) per subspace
    pub convergence_info: Vec<(usize, bool, f32)>,
    /// Total time spent training
    pub total_training_time: std::time::Duration,
}

impl PQTrainingResult {
    /// Average inertia across subspaces
    pub fn average_inertia(&self) -> f32 {
        if self.subspace_inertias.is_empty() {
            0.0
        } else {
            self.subspace_inertias.iter().sum::<f32>() / self.subspace_inertias.len() as f32
        }
    }

    /// Check if all subspaces converged
    pub fn all_converged(&self) -> bool {
        self.convergence_info.iter().all(|(_, converged, _)| *converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::scalar::dot_product;
    use crate::utils::generate_random_vectors;

    fn training_set(n: usize, dim: usize) -> TrainingSet {
        TrainingSet::from_vectors(&generate_random_vectors(n, dim)).unwrap()
    }

    #[test]
    fn test_layout_validation() {
        assert!(PQLayout::new(128, 8, 8, Distance::L2).is_ok());
        // dimension not divisible by subspaces
        assert!(matches!(PQLayout::new(100, 8, 8, Distance::L2), Err(Error::InvalidConfig(_))));
        // too many bits for byte codes
        assert!(PQLayout::new(128, 8, 9, Distance::L2).is_err());
        assert!(PQLayout::new(128, 0, 4, Distance::L2).is_err());
    }

    #[test]
    fn test_pq_basic_training() {
        let data = training_set(100, 16);
        let layout = PQLayout::new(16, 4, 4, Distance::InnerProduct).unwrap();
        let mut pq = ProductQuantizer::new(layout).unwrap();

        let result = pq.train(&data, 10, 1234).unwrap();

        assert!(pq.is_trained());
        assert_eq!(result.subspace_inertias.len(), 4);
        for subspace in 0..4 {
            // 16 centroids of dimension 4
            assert_eq!(pq.subspace_centroids(subspace).len(), 16 * 4);
        }
    }

    #[test]
    fn test_pq_encode_decode() {
        let data = training_set(200, 8);
        let layout = PQLayout::new(8, 4, 4, Distance::L2).unwrap();
        let mut pq = ProductQuantizer::new(layout).unwrap();
        pq.train(&data, 20, 1).unwrap();

        let codes = pq.encode(data.vector(0)).unwrap();
        assert_eq!(codes.len(), 4);
        assert!(codes.iter().all(|&c| c < 16));

        let decoded = pq.decode(&codes).unwrap();
        assert_eq!(decoded.len(), 8);

        // Each coordinate lies in [-1, 1), so the error is bounded well below
        // that of a zero reconstruction
        let err = pq.reconstruction_error(&data).unwrap();
        let zero_err: f32 = data.vectors().map(|v| dot_product(v, v)).sum::<f32>() / data.len() as f32;
        assert!(err < zero_err);
    }

    #[test]
    fn test_training_is_reproducible() {
        let data = training_set(64, 8);
        let layout = PQLayout::new(8, 2, 3, Distance::L2).unwrap();

        let mut a = ProductQuantizer::new(layout.clone()).unwrap();
        let mut b = ProductQuantizer::new(layout).unwrap();
        a.train(&data, 8, 99).unwrap();
        b.train(&data, 8, 99).unwrap();
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_asymmetric_distance_matches_decoded() {
        let data = training_set(50, 4);
        let layout = PQLayout::new(4, 2, 2, Distance::InnerProduct).unwrap();
        let mut pq = ProductQuantizer::new(layout).unwrap();
        pq.train(&data, 10, 5).unwrap();

        let query = data.vector(1);
        let codes = pq.encode(data.vector(2)).unwrap();
        let table = pq.distance_table(query).unwrap();
        let adc = pq.asymmetric_distance(&table, &codes).unwrap();

        let decoded = pq.decode(&codes).unwrap();
        approx::assert_relative_eq!(adc, -dot_product(query, &decoded), epsilon = 1e-5);
    }

    #[test]
    fn test_distance_estimation_error() {
        let data = training_set(40, 8);
        let layout = PQLayout::new(8, 4, 4, Distance::L2).unwrap();
        let mut pq = ProductQuantizer::new(layout).unwrap();
        pq.train(&data, 10, 3).unwrap();

        let error = pq.distance_estimation_error(&data, 5).unwrap();
        assert!(error.is_finite());
        assert!(error > 0.0);
        let spread: f32 =
            data.vectors().map(|v| Distance::L2.distance(data.vector(0), v)).sum::<f32>() / data.len() as f32;
        assert!(error < spread, "estimation error {} vs mean distance {}", error, spread);

        assert_eq!(pq.distance_estimation_error(&data, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_pq_error_handling() {
        let layout = PQLayout::new(16, 4, 4, Distance::L2).unwrap();
        let mut pq = ProductQuantizer::new(layout).unwrap();

        // Untrained
        assert!(pq.encode(&[1.0; 16]).is_err());
        assert!(pq.decode(&[1, 2, 3, 4]).is_err());

        // Wrong training dimension
        assert!(matches!(pq.train(&training_set(10, 8), 5, 0), Err(Error::TrainingFailed(_))));

        pq.train(&training_set(10, 16), 5, 0).unwrap();
        assert!(pq.encode(&[1.0; 8]).is_err());
        assert!(pq.decode(&[1, 2]).is_err());
        assert!(pq.decode(&[1, 2, 3, 16]).is_err());
    }
}
