//! shardpq command-line interface
//!
//! Trains per-index PQ codebooks from sharded embedding vectors and inspects
//! or prepares the files involved.

use clap::{Parser, Subcommand};
use console::style;
use std::fs::File;
use std::path::PathBuf;

use shardpq::cli::{convert, info, train};

#[derive(Parser)]
#[command(name = "shardpq")]
#[command(about = "Train per-index product-quantization codebooks from sharded vectors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress bars and use simple text output
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Write log records to this file instead of stderr
    #[arg(long = "log_file", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train codebooks for a range of indices
    Train(train::TrainArgs),

    /// Show information about a trained codebook
    Info(info::InfoArgs),

    /// Convert vectors into a native shard
    Convert(convert::ConvertArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    logger.filter_level(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    if let Some(path) = &cli.log_file {
        let file = File::create(path)?;
        logger.target(env_logger::Target::Pipe(Box::new(file)));
    }
    logger.init();

    if !cli.no_progress {
        println!("{}", style("🚀 shardpq").bold().blue());
        println!("{}", style("Per-index PQ codebook training").dim());
        println!();
    }

    let lib_cli = shardpq::Cli {
        verbose: cli.verbose,
        no_progress: cli.no_progress,
    };

    match cli.command {
        Commands::Train(args) => train::run(args, &lib_cli),
        Commands::Info(args) => info::run(args, &lib_cli),
        Commands::Convert(args) => convert::run(args, &lib_cli),
    }
}
