//! Codebook information command
//!
//! Prints the structure and training configuration of a stored codebook and,
//! given a sample shard, how well it reconstructs those vectors.

use anyhow::Context;
use clap::Args;
use console::style;
use std::path::PathBuf;

use crate::aggregate::TrainingSet;
use crate::formats::{read_fvecs_file, read_shard_file, ShardFormat};
use crate::pq::{Codebook, ProductQuantizer};
use crate::utils::format_bytes;

/// Sample vectors used as queries for the distance check
const SAMPLE_QUERIES: usize = 16;

/// Arguments of the `info` command
#[derive(Args)]
pub struct InfoArgs {
    /// Path to a codebook file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Shard to measure reconstruction error on
    #[arg(long)]
    pub sample: Option<PathBuf>,

    /// Read at most this many vectors from the sample
    #[arg(long = "first_n")]
    pub first_n: Option<usize>,
}

/// Print codebook details
pub fn run(args: InfoArgs, cli: &crate::Cli) -> anyhow::Result<()> {
    if !cli.no_progress {
        println!("{}", style("ℹ️  Codebook Analysis").bold().blue());
        println!("  File: {}", args.input.display());
        println!();
    }

    let codebook = Codebook::load(&args.input)
        .with_context(|| format!("Failed to load codebook {}", args.input.display()))?;
    let layout = &codebook.layout;
    let stats = codebook.memory_stats();

    println!("📊 Structure:");
    println!("  Dimension: {}", style(layout.dimension).bold().green());
    println!("  Sub-quantizers: {}", style(layout.num_subspaces).bold().green());
    println!("  Sub-vector dimension: {}", layout.subspace_dimension());
    println!("  Bits per code: {}", layout.bits_per_code);
    println!("  Centroids per sub-quantizer: {}", layout.num_centroids());
    println!("  Metric: {}", layout.metric);
    if let Some(spec) = codebook.factory_spec() {
        println!("  Factory: {}", spec);
    }

    println!("\n🏋️ Training:");
    println!("  Vectors: {}", codebook.num_training_vectors);
    println!("  Iterations: {}", codebook.config.iterations);
    println!("  Seed: {}", codebook.config.seed);

    println!("\n💾 Memory:");
    println!("  Centroids: {} ({})", stats.total_centroids, format_bytes(stats.memory_bytes));
    println!("  Code size: {} bits per vector", stats.code_bits);
    println!("  Compression ratio: {:.1}x", stats.compression_ratio);

    if let Some(sample) = &args.sample {
        let ext = sample.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let (data, dimension) = match ShardFormat::from_extension(ext) {
            ShardFormat::Fvecs => read_fvecs_file(sample, args.first_n),
            ShardFormat::Native => read_shard_file(sample, args.first_n),
        }
        .with_context(|| format!("Failed to read sample {}", sample.display()))?;

        anyhow::ensure!(
            dimension == layout.dimension,
            "Sample dimension {} does not match codebook dimension {}",
            dimension,
            layout.dimension
        );

        let set = TrainingSet::new(data, dimension)?;
        let pq = ProductQuantizer::from_codebook(&codebook)?;
        let error = pq.reconstruction_error(&set)?;
        let gap = pq.distance_estimation_error(&set, SAMPLE_QUERIES)?;

        println!("\n🎯 Reconstruction:");
        println!("  Sample vectors: {}", set.len());
        println!("  Mean squared error: {:.6}", style(error).bold());
        println!(
            "  Mean {} distance gap (asymmetric vs exact, {} queries): {:.6}",
            layout.metric,
            SAMPLE_QUERIES.min(set.len()),
            gap
        );
    }

    Ok(())
}
