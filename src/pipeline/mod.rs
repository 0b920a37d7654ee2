//! Pipeline driver
//!
//! For every index in the configured range: aggregate its shards, train a
//! quantizer, persist the codebook. Indices are independent and run on a
//! bounded rayon pool; the destination directory is approved once up front so
//! workers never race on it.

use crate::aggregate::{DimensionPolicy, ScanPolicy, ShardWarning, VectorAggregator};
use crate::shard::{FileShardStore, ShardStore};
use crate::store::CodebookStore;
use crate::trainer::{PqTrainer, QuantizerTrainer, TrainerConfig};
use crate::{Error, Result};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Run summary file written next to the codebooks
pub const SUMMARY_FILE: &str = "summary.json";

/// What an index without vectors does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyIndexPolicy {
    /// Record the index as skipped and keep going
    #[default]
    SkipIndex,
    /// Stop the run with [`Error::NoVectors`]
    AbortRun,
}

/// Everything one run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base paths scanned for shards, in priority order
    pub base_paths: Vec<PathBuf>,
    /// Indices to train, `[start, end)`
    pub index_range: Range<usize>,
    /// Exclusive upper bound on run ids
    pub max_run_id: usize,
    /// Cap on vectors read per shard
    pub first_n: Option<usize>,
    /// Destination directory for codebooks
    pub destination: PathBuf,
    /// Allow reusing an existing destination
    pub overwrite: bool,
    /// Trainer template
    pub trainer: TrainerConfig,
    /// Dimension source
    pub dimension_policy: DimensionPolicy,
    /// Gap handling while scanning run ids
    pub scan_policy: ScanPolicy,
    /// Empty index handling
    pub empty_policy: EmptyIndexPolicy,
    /// Worker threads (0 = one per core)
    pub threads: usize,
}

impl PipelineConfig {
    /// Config with defaults for everything but inputs and destination
    pub fn new(base_paths: Vec<PathBuf>, index_range: Range<usize>, destination: impl Into<PathBuf>) -> Self {
        Self {
            base_paths,
            index_range,
            max_run_id: 1000,
            first_n: None,
            destination: destination.into(),
            overwrite: false,
            trainer: TrainerConfig::default(),
            dimension_policy: DimensionPolicy::AutoDetect,
            scan_policy: ScanPolicy::ScanAll,
            empty_policy: EmptyIndexPolicy::SkipIndex,
            threads: 0,
        }
    }

    /// Validate everything that can be checked before touching shards
    pub fn validate(&self) -> Result<()> {
        if self.base_paths.is_empty() {
            return Err(Error::InvalidConfig("At least one base path is required".to_string()));
        }

        if self.index_range.start > self.index_range.end {
            return Err(Error::InvalidConfig(format!(
                "Index range start {} is after end {}",
                self.index_range.start, self.index_range.end
            )));
        }

        self.trainer.validate()?;

        if let DimensionPolicy::Explicit(dimension) = self.dimension_policy {
            self.trainer.with_dimension(dimension).layout()?;
        }

        Ok(())
    }
}

/// Outcome of one index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Codebook trained and written
    Trained,
    /// No shard contributed a vector
    SkippedNoVectors,
    /// Shards disagreed on the vector dimension
    SkippedDimensionMismatch,
    /// Training, configuration or persistence failed
    Failed,
}

/// Per-index record of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Index
    pub index: usize,
    /// Vectors handed to the trainer (0 unless trained)
    pub vectors_trained_on: usize,
    /// Outcome
    pub status: IndexStatus,
    /// Shards read successfully
    pub shards_read: usize,
    /// Corrupt shards skipped while aggregating
    pub warnings: Vec<ShardWarning>,
    /// Failure detail for anything but `Trained`
    pub message: Option<String>,
    /// Written codebook
    pub codebook_path: Option<PathBuf>,
    /// Wall time spent on this index, in milliseconds
    pub elapsed_ms: u64,
}

impl RunSummary {
    fn new(index: usize) -> Self {
        Self {
            index,
            vectors_trained_on: 0,
            status: IndexStatus::Failed,
            shards_read: 0,
            warnings: Vec::new(),
            message: None,
            codebook_path: None,
            elapsed_ms: 0,
        }
    }

    /// Whether a codebook was written
    pub fn is_trained(&self) -> bool {
        self.status == IndexStatus::Trained
    }
}

/// Stages of one index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Aggregating,
    Training,
    Persisting,
}

/// Drives aggregation, training and persistence over an index range
pub struct PipelineDriver {
    shards: Box<dyn ShardStore>,
    trainer: Box<dyn QuantizerTrainer>,
    codebooks: CodebookStore,
    progress: Option<ProgressBar>,
}

impl Default for PipelineDriver {
    fn default() -> Self {
        Self::new(Box::new(FileShardStore::default()), Box::new(PqTrainer))
    }
}

impl PipelineDriver {
    /// Create a driver over a shard store and a trainer
    pub fn new(shards: Box<dyn ShardStore>, trainer: Box<dyn QuantizerTrainer>) -> Self {
        Self {
            shards,
            trainer,
            codebooks: CodebookStore,
            progress: None,
        }
    }

    /// Report per-index completion on a progress bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the pipeline
    ///
    /// Startup failures ([`Error::InvalidConfig`], [`Error::DestinationExists`])
    /// are returned before any shard is read. Per-index failures are recorded
    /// in the returned summaries, ordered by index, unless the empty policy is
    /// [`EmptyIndexPolicy::AbortRun`].
    pub fn run(&self, config: &PipelineConfig) -> Result<Vec<RunSummary>> {
        config.validate()?;
        self.trainer.validate(&config.trainer)?;
        self.codebooks.prepare_destination(&config.destination, config.overwrite)?;

        log::info!(
            "Training indices {}..{} from {} base path(s) into {}",
            config.index_range.start,
            config.index_range.end,
            config.base_paths.len(),
            config.destination.display()
        );

        let summaries = match config.empty_policy {
            EmptyIndexPolicy::AbortRun => {
                let mut summaries = Vec::with_capacity(config.index_range.len());
                for index in config.index_range.clone() {
                    let summary = self.process_index(index, config);
                    let empty = summary.status == IndexStatus::SkippedNoVectors;
                    summaries.push(summary);
                    if empty {
                        // Partial summary, ending at the index that stopped the run
                        write_summary(&config.destination, &summaries)?;
                        return Err(Error::NoVectors(index));
                    }
                }
                summaries
            }
            EmptyIndexPolicy::SkipIndex => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(config.threads)
                    .build()
                    .map_err(|e| Error::InvalidConfig(format!("Cannot build worker pool: {}", e)))?;

                pool.install(|| {
                    config
                        .index_range
                        .clone()
                        .into_par_iter()
                        .map(|index| self.process_index(index, config))
                        .collect::<Vec<_>>()
                })
            }
        };

        write_summary(&config.destination, &summaries)?;

        let trained = summaries.iter().filter(|s| s.is_trained()).count();
        log::info!("Trained {} of {} indices", trained, summaries.len());

        Ok(summaries)
    }

    /// Aggregate, train and persist one index
    fn process_index(&self, index: usize, config: &PipelineConfig) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::new(index);

        if let Err((stage, e)) = self.train_index(index, config, &mut summary) {
            summary.status = match e {
                Error::NoVectors(_) => {
                    log::error!("No vectors found for index {}, skipping.", index);
                    IndexStatus::SkippedNoVectors
                }
                Error::DimensionMismatch { .. } => {
                    log::error!("Skipping index {}: {}", index, e);
                    IndexStatus::SkippedDimensionMismatch
                }
                _ => {
                    log::error!("Index {} failed while {:?}: {}", index, stage, e);
                    IndexStatus::Failed
                }
            };
            summary.message = Some(e.to_string());
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(pb) = &self.progress {
            pb.set_message(format!("index {}", index));
            pb.inc(1);
        }

        summary
    }

    fn train_index(
        &self,
        index: usize,
        config: &PipelineConfig,
        summary: &mut RunSummary,
    ) -> std::result::Result<(), (Stage, Error)> {
        let aggregation = VectorAggregator::new(&*self.shards)
            .scan_policy(config.scan_policy)
            .dimension_policy(config.dimension_policy)
            .collect(&config.base_paths, index, config.max_run_id, config.first_n)
            .map_err(|e| (Stage::Aggregating, e))?;

        summary.shards_read = aggregation.shards_read;
        summary.warnings = aggregation.warnings;

        log::info!(
            "Index {}: {} vectors of dimension {} from {} shard(s)",
            index,
            aggregation.training_set.len(),
            aggregation.dimension,
            aggregation.shards_read
        );

        let trainer_config = config.trainer.with_dimension(aggregation.dimension);
        let codebook = self
            .trainer
            .train(&aggregation.training_set, &trainer_config)
            .map_err(|e| (Stage::Training, e))?;

        let path = self
            .codebooks
            .write(&config.destination, index, &codebook)
            .map_err(|e| (Stage::Persisting, e))?;

        summary.vectors_trained_on = codebook.num_training_vectors;
        summary.codebook_path = Some(path);
        summary.status = IndexStatus::Trained;
        Ok(())
    }
}

fn write_summary(destination: &Path, summaries: &[RunSummary]) -> Result<()> {
    let file = File::create(destination.join(SUMMARY_FILE))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summaries)?;
    writer.flush()?;
    Ok(())
}
