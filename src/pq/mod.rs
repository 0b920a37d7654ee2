//! Product quantization
//!
//! The built-in training backend: k-means per subspace, factory spec parsing
//! and the persisted [`Codebook`].

pub mod codebook;
pub mod factory;
pub mod kmeans;
pub mod quantizer;

pub use codebook::{Codebook, CodebookStats};
pub use factory::FactorySpec;
pub use kmeans::{KMeans, KMeansParams, KMeansResult};
pub use quantizer::{PQLayout, PQTrainingResult, ProductQuantizer};
