//! Per-index vector aggregation
//!
//! For one index, every configured base path is scanned for run ids
//! `0..max_run_id` and the vectors of all readable shards are concatenated into
//! a single [`TrainingSet`]. Concatenation order is base path order, then run id
//! ascending, so repeated collection over the same files is bit-identical.

use crate::shard::{ShardLocator, ShardStore, VectorShard};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to do when a run id has no shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPolicy {
    /// Keep scanning every run id; gaps are skipped
    #[default]
    #[value(name = "all")]
    ScanAll,
    /// Stop scanning a base path at its first missing run id
    StopAtGap,
}

/// Where the dimension of an index comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionPolicy {
    /// First shard that yields vectors sets the dimension
    #[default]
    AutoDetect,
    /// Every shard must match this dimension
    Explicit(usize),
}

/// A shard that existed but could not be read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardWarning {
    /// Shard location
    pub path: PathBuf,
    /// Run id of the shard
    pub run_id: usize,
    /// Decode failure
    pub cause: String,
}

/// Row-major concatenation of all vectors collected for one index
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    data: Vec<f32>,
    dimension: usize,
}

impl TrainingSet {
    /// Wrap a row-major buffer
    pub fn new(data: Vec<f32>, dimension: usize) -> Result<Self> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(Error::InvalidConfig(format!(
                "Buffer of {} floats does not hold whole vectors of dimension {}",
                data.len(),
                dimension
            )));
        }
        Ok(Self { data, dimension })
    }

    /// Build from individual vectors, which must share a dimension
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self> {
        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for v in vectors {
            if v.len() != dimension {
                return Err(Error::InvalidConfig(format!(
                    "Vector has dimension {}, expected {}",
                    v.len(),
                    dimension
                )));
            }
            data.extend_from_slice(v);
        }
        Self::new(data, dimension)
    }

    /// Vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    /// Whether no vectors were collected
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major data
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Vector at position `i`
    pub fn vector(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Iterate over vectors
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }
}

/// Result of collecting one index
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Concatenated vectors
    pub training_set: TrainingSet,
    /// Dimension shared by all contributing shards
    pub dimension: usize,
    /// Shards successfully read (including empty ones)
    pub shards_read: usize,
    /// Corrupt shards that were skipped
    pub warnings: Vec<ShardWarning>,
}

/// Collects the training vectors of one index across shards
pub struct VectorAggregator<'a> {
    store: &'a dyn ShardStore,
    scan_policy: ScanPolicy,
    dimension_policy: DimensionPolicy,
}

impl<'a> VectorAggregator<'a> {
    /// Create an aggregator with default policies (scan all, auto-detect)
    pub fn new(store: &'a dyn ShardStore) -> Self {
        Self {
            store,
            scan_policy: ScanPolicy::default(),
            dimension_policy: DimensionPolicy::default(),
        }
    }

    /// Set the gap policy
    pub fn scan_policy(mut self, policy: ScanPolicy) -> Self {
        self.scan_policy = policy;
        self
    }

    /// Set the dimension policy
    pub fn dimension_policy(mut self, policy: DimensionPolicy) -> Self {
        self.dimension_policy = policy;
        self
    }

    /// Collect every readable shard of `index`
    ///
    /// Missing shards are skipped silently and corrupt shards are skipped with a
    /// warning. A shard whose dimension disagrees with the index dimension fails
    /// the whole index with [`Error::DimensionMismatch`]; collecting nothing
    /// fails with [`Error::NoVectors`].
    pub fn collect(
        &self,
        base_paths: &[PathBuf],
        index: usize,
        max_run_id: usize,
        first_n: Option<usize>,
    ) -> Result<Aggregation> {
        let mut data = Vec::new();
        let mut dimension = match self.dimension_policy {
            DimensionPolicy::Explicit(d) => Some(d),
            DimensionPolicy::AutoDetect => None,
        };
        let mut shards_read = 0;
        let mut warnings = Vec::new();

        for base_path in base_paths {
            for run_id in 0..max_run_id {
                let locator = ShardLocator::new(base_path.clone(), run_id, index);

                let shard = match self.store.read(&locator, first_n) {
                    Ok(shard) => shard,
                    Err(Error::NotFound(_)) => match self.scan_policy {
                        ScanPolicy::ScanAll => continue,
                        ScanPolicy::StopAtGap => break,
                    },
                    Err(Error::Corrupt { path, source }) => {
                        log::warn!("Error reading {}: {}. Skipping.", path.display(), source);
                        warnings.push(ShardWarning {
                            path,
                            run_id,
                            cause: source.to_string(),
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                shards_read += 1;
                if shard.is_empty() {
                    continue;
                }

                match dimension {
                    Some(expected) if expected != shard.dimension() => {
                        return Err(Error::DimensionMismatch {
                            index,
                            path: self.store.describe(&locator),
                            expected,
                            actual: shard.dimension(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        log::debug!("Determined vector dimension {} for index {}", shard.dimension(), index);
                        dimension = Some(shard.dimension());
                    }
                }

                append(&mut data, shard);
            }
        }

        let dimension = match dimension {
            Some(d) if !data.is_empty() => d,
            _ => return Err(Error::NoVectors(index)),
        };

        Ok(Aggregation {
            training_set: TrainingSet::new(data, dimension)?,
            dimension,
            shards_read,
            warnings,
        })
    }
}

fn append(data: &mut Vec<f32>, shard: VectorShard) {
    if data.is_empty() {
        *data = shard.into_data();
    } else {
        data.extend_from_slice(shard.as_slice());
    }
}
