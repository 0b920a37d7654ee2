//! shardpq: per-index product-quantization codebook training over sharded vectors
//!
//! Embedding vectors captured across many runs are stored as one shard per
//! `(base_path, run_id, index)`. This crate gathers every shard belonging to an
//! index, trains an independent quantizer for it and persists the codebook.

#![warn(missing_docs)]

/// Distance metrics used by quantizers
pub mod distance;

/// Shard file formats (native flat shards, fvecs)
pub mod formats;

/// Shard locators and the shard store
pub mod shard;

/// Per-index vector aggregation across shards
pub mod aggregate;

/// Product quantization (k-means, quantizer, factory specs, codebooks)
pub mod pq;

/// Trainer configuration and the quantizer training capability
pub mod trainer;

/// Codebook persistence
pub mod store;

/// Pipeline driver and run summaries
pub mod pipeline;

/// General utilities and helpers
pub mod utils;

/// Command-line interface modules
pub mod cli;

use std::path::PathBuf;

/// CLI configuration structure
#[derive(Debug)]
pub struct Cli {
    /// Verbose output
    pub verbose: bool,
    /// Plain text output without progress bars
    pub no_progress: bool,
}

// Re-export commonly used types
pub use aggregate::{Aggregation, DimensionPolicy, ScanPolicy, TrainingSet, VectorAggregator};
pub use distance::Distance;
pub use pipeline::{EmptyIndexPolicy, IndexStatus, PipelineConfig, PipelineDriver, RunSummary};
pub use pq::Codebook;
pub use shard::{FileShardStore, ShardLocator, ShardStore, VectorShard};
pub use store::CodebookStore;
pub use trainer::{PqTrainer, QuantizerTrainer, TrainerConfig};

/// Result type for shardpq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for shardpq operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shard file does not exist
    #[error("Shard not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Shard file exists but could not be decoded
    #[error("Corrupt shard {}: {source}", path.display())]
    Corrupt {
        /// Location of the shard
        path: PathBuf,
        /// Underlying decode failure
        #[source]
        source: std::io::Error,
    },

    /// A shard disagrees with the dimension established for its index
    #[error("Dimension mismatch for index {index} at {}: expected {expected}, got {actual}", path.display())]
    DimensionMismatch {
        /// Index being aggregated
        index: usize,
        /// Offending shard
        path: PathBuf,
        /// Dimension established for the index
        expected: usize,
        /// Dimension found in the shard
        actual: usize,
    },

    /// No shard contributed a vector to this index
    #[error("No vectors found for index {0}")]
    NoVectors(usize),

    /// Trainer configuration cannot produce a valid quantizer
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The training backend rejected the data
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// Destination directory exists and overwrite was not requested
    #[error("{} already exists. Use --overwrite to replace it.", .0.display())]
    DestinationExists(PathBuf),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
