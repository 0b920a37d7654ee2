//! Codebook training command
//!
//! Trains one product-quantization codebook per index in `--range`, reading
//! `r{run}_i{index}.{ext}` shards from every `--paths` entry.

use clap::Args;
use console::style;
use std::path::PathBuf;
use std::time::Instant;

use crate::pipeline::{EmptyIndexPolicy, IndexStatus, PipelineConfig, PipelineDriver, RunSummary};
use crate::shard::{FileShardStore, DEFAULT_SHARD_EXTENSION};
use crate::trainer::{PqTrainer, TrainerConfig};
use crate::{DimensionPolicy, Distance, ScanPolicy};

/// Arguments of the `train` command
#[derive(Args)]
pub struct TrainArgs {
    /// Base directories holding shards, scanned in order
    #[arg(long, num_args = 1.., required = true)]
    pub paths: Vec<PathBuf>,

    /// Destination directory for codebooks
    #[arg(long = "save_path")]
    pub save_path: PathBuf,

    /// Reuse an existing destination directory
    #[arg(long)]
    pub overwrite: bool,

    /// Number of run ids to scan per base path
    #[arg(long = "max_runs", default_value = "1000")]
    pub max_runs: usize,

    /// Index range to train, start inclusive, end exclusive
    #[arg(long, num_args = 2, value_names = ["START", "END"], required = true)]
    pub range: Vec<usize>,

    /// Vector dimension (auto-detected from the first shard when omitted)
    #[arg(long)]
    pub dim: Option<usize>,

    /// Number of sub-quantizers (one per dimension when omitted)
    #[arg(long = "d_sub")]
    pub d_sub: Option<usize>,

    /// K-means iterations
    #[arg(long, default_value = "32")]
    pub niter: usize,

    /// Read at most this many vectors from each shard
    #[arg(long = "first_n")]
    pub first_n: Option<usize>,

    /// Quantizer structure, e.g. PQ8, PQ16x4, PQ32x4fs (overrides --d_sub and --bits)
    #[arg(long)]
    pub factory: Option<String>,

    /// Bits per sub-quantizer code
    #[arg(long, default_value = "4")]
    pub bits: usize,

    /// Similarity metric (inner_product, l2)
    #[arg(long, default_value = "inner_product")]
    pub metric: Distance,

    /// Shard file extension
    #[arg(long, default_value = DEFAULT_SHARD_EXTENSION)]
    pub ext: String,

    /// Missing run id handling
    #[arg(long, value_enum, default_value_t = ScanPolicy::ScanAll)]
    pub scan: ScanPolicy,

    /// Abort the run at the first index without vectors
    #[arg(long)]
    pub strict: bool,

    /// K-means seed
    #[arg(long, default_value = "1234")]
    pub seed: u64,

    /// Number of threads to use (0 = auto)
    #[arg(short = 'j', long, default_value = "0")]
    pub threads: usize,
}

impl TrainArgs {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let (start, end) = match self.range.as_slice() {
            [start, end] => (*start, *end),
            _ => anyhow::bail!("--range takes exactly two values: START END"),
        };

        let trainer = TrainerConfig {
            dimension: self.dim.unwrap_or(TrainerConfig::default().dimension),
            sub_quantizers: self.d_sub,
            bits_per_code: self.bits,
            metric: self.metric,
            iterations: self.niter,
            factory_spec: self.factory.clone(),
            seed: self.seed,
        };

        let mut config = PipelineConfig::new(self.paths.clone(), start..end, self.save_path.clone());
        config.max_run_id = self.max_runs;
        config.first_n = self.first_n;
        config.overwrite = self.overwrite;
        config.trainer = trainer;
        config.dimension_policy = match self.dim {
            Some(d) => DimensionPolicy::Explicit(d),
            None => DimensionPolicy::AutoDetect,
        };
        config.scan_policy = self.scan;
        config.empty_policy = if self.strict {
            EmptyIndexPolicy::AbortRun
        } else {
            EmptyIndexPolicy::SkipIndex
        };
        config.threads = self.threads;
        Ok(config)
    }
}

/// Run the training pipeline and print a per-index report
pub fn run(args: TrainArgs, cli: &crate::Cli) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let config = args.pipeline_config()?;

    if !cli.no_progress {
        println!("{}", style("🧮 Training PQ Codebooks").bold().green());
        println!("  Paths: {}", args.paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "));
        println!("  Destination: {}", args.save_path.display());
        println!("  Indices: {}..{}", config.index_range.start, config.index_range.end);
        match &args.factory {
            Some(spec) => println!("  Factory: {}", spec),
            None => match args.d_sub {
                Some(m) => println!("  Sub-quantizers: {} x {} bits", m, args.bits),
                None => println!("  Sub-quantizers: one per dimension x {} bits", args.bits),
            },
        }
        println!("  Metric: {}", args.metric);
        println!("  Iterations: {}", args.niter);
        println!();
    }

    let pb = crate::utils::progress_bar(config.index_range.len() as u64, cli);

    let mut driver = PipelineDriver::new(Box::new(FileShardStore::new(args.ext.as_str())), Box::new(PqTrainer));
    if let Some(pb) = &pb {
        driver = driver.with_progress(pb.clone());
    }

    let result = driver.run(&config);
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let summaries = result?;

    print_report(&summaries, cli);

    let trained = summaries.iter().filter(|s| s.is_trained()).count();
    if !cli.no_progress {
        println!(
            "\n🎉 Trained {} of {} codebooks in {}",
            style(trained).bold().green(),
            summaries.len(),
            style(humantime::format_duration(start_time.elapsed())).bold().green()
        );
        println!("📁 Saved to: {}", args.save_path.display());
    }

    Ok(())
}

fn print_report(summaries: &[RunSummary], cli: &crate::Cli) {
    println!("📋 Run summary:");
    for summary in summaries {
        let reason = summary.message.as_deref().unwrap_or("");
        match summary.status {
            IndexStatus::Trained => println!(
                "  {} index {}: {} vectors from {} shard(s)",
                style("✓").green(),
                summary.index,
                summary.vectors_trained_on,
                summary.shards_read
            ),
            IndexStatus::SkippedNoVectors => {
                println!("  {} index {}: no vectors, skipped", style("-").yellow(), summary.index)
            }
            IndexStatus::SkippedDimensionMismatch => {
                println!("  {} index {}: {}", style("✗").red(), summary.index, reason)
            }
            IndexStatus::Failed => println!("  {} index {}: {}", style("✗").red().bold(), summary.index, reason),
        }

        for warning in &summary.warnings {
            println!("      {} skipped {}: {}", style("!").yellow(), warning.path.display(), warning.cause);
        }

        if cli.verbose {
            println!("      {} ms", summary.elapsed_ms);
        }
    }
}
