//! Quantizer training
//!
//! [`QuantizerTrainer`] is the seam between the pipeline and whatever library
//! learns the codebooks. Its job is to turn a [`TrainerConfig`] into a correctly
//! structured quantizer and train it on exactly the vectors it is handed.
//! [`PqTrainer`] is the built-in k-means product quantizer.

use crate::aggregate::TrainingSet;
use crate::pq::{Codebook, FactorySpec, PQLayout, ProductQuantizer};
use crate::{Distance, Error, Result};
use serde::{Deserialize, Serialize};

/// Trainer configuration, shared read-only by every index of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Vector dimension
    pub dimension: usize,
    /// Number of sub-quantizers; must divide `dimension` without a factory spec.
    /// `None` means one sub-quantizer per dimension.
    pub sub_quantizers: Option<usize>,
    /// Bits per sub-quantizer code
    pub bits_per_code: usize,
    /// Similarity metric
    pub metric: Distance,
    /// K-means iteration budget
    pub iterations: usize,
    /// Structure override; when present `sub_quantizers` and `bits_per_code` are ignored
    pub factory_spec: Option<String>,
    /// K-means seed
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            sub_quantizers: None,
            bits_per_code: 4,
            metric: Distance::InnerProduct,
            iterations: 32,
            factory_spec: None,
            seed: 1234,
        }
    }
}

impl TrainerConfig {
    /// Checks that hold whatever the dimension turns out to be
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("Iteration budget must be positive".to_string()));
        }

        match &self.factory_spec {
            Some(spec) => {
                FactorySpec::parse(spec)?;
            }
            None => {
                let m = self.sub_quantizers.unwrap_or(1);
                if m == 0 {
                    return Err(Error::InvalidConfig("Number of sub-quantizers must be positive".to_string()));
                }
                // Layout with a stand-in dimension, only to check the code width
                PQLayout::new(m, m, self.bits_per_code, self.metric)?;
            }
        }

        Ok(())
    }

    /// Copy of this config with a resolved dimension
    pub fn with_dimension(&self, dimension: usize) -> Self {
        Self {
            dimension,
            ..self.clone()
        }
    }

    /// Quantizer structure implied by this config
    ///
    /// The factory spec, when present, is authoritative.
    pub fn layout(&self) -> Result<PQLayout> {
        match &self.factory_spec {
            Some(spec) => FactorySpec::parse(spec)?.layout(self.dimension, self.metric),
            None => PQLayout::new(
                self.dimension,
                self.sub_quantizers.unwrap_or(self.dimension),
                self.bits_per_code,
                self.metric,
            ),
        }
    }
}

/// Training capability
pub trait QuantizerTrainer: Send + Sync {
    /// Static configuration checks, run once before any index is processed
    fn validate(&self, config: &TrainerConfig) -> Result<()> {
        config.validate()
    }

    /// Train a codebook on every vector in `training_set`
    ///
    /// Structural problems are reported as [`Error::InvalidConfig`]; failures of
    /// the training itself as [`Error::TrainingFailed`].
    fn train(&self, training_set: &TrainingSet, config: &TrainerConfig) -> Result<Codebook>;
}

/// Built-in product quantizer backend
#[derive(Debug, Clone, Copy, Default)]
pub struct PqTrainer;

impl QuantizerTrainer for PqTrainer {
    fn train(&self, training_set: &TrainingSet, config: &TrainerConfig) -> Result<Codebook> {
        if training_set.dimension() != config.dimension {
            return Err(Error::InvalidConfig(format!(
                "Training set dimension {} does not match configured dimension {}",
                training_set.dimension(),
                config.dimension
            )));
        }

        let layout = config.layout()?;
        let mut pq = ProductQuantizer::new(layout.clone())?;

        let stats = pq.train(training_set, config.iterations, config.seed)?;

        if !stats.all_converged() {
            log::debug!(
                "k-means used the full budget of {} iterations in some subspaces (avg inertia {:.4})",
                config.iterations,
                stats.average_inertia()
            );
        }

        Ok(Codebook {
            config: config.clone(),
            layout,
            num_training_vectors: training_set.len(),
            blob: pq.to_bytes()?,
        })
    }
}
