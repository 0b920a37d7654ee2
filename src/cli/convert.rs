//! Shard conversion command
//!
//! Turns fvecs files or headerless little-endian `f32` dumps into native
//! shards that `train` can read.

use anyhow::Context;
use clap::{Args, ValueEnum};
use console::style;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::formats::{read_fvecs_file, read_raw_f32, read_shard_file, write_shard};

/// Input encodings accepted by `convert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Pick from the file extension (`.fvecs`, otherwise raw)
    Auto,
    /// Float vectors with a per-record dimension prefix
    Fvecs,
    /// Headerless rows of `f32`, requires `--dim`
    Raw,
}

/// Arguments of the `convert` command
#[derive(Args)]
pub struct ConvertArgs {
    /// Input file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output shard path, e.g. A/r0_i3.index
    #[arg(short, long)]
    pub output: PathBuf,

    /// Input format
    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    pub format: InputFormat,

    /// Vector dimension of raw input
    #[arg(long)]
    pub dim: Option<usize>,

    /// Convert at most this many vectors
    #[arg(long = "first_n")]
    pub first_n: Option<usize>,
}

/// Convert one file into a native shard
pub fn run(args: ConvertArgs, cli: &crate::Cli) -> anyhow::Result<()> {
    let format = resolve_format(&args.input, args.format);

    if !cli.no_progress {
        println!("{}", style("🔄 Shard Conversion").bold().green());
        println!("  Input: {} ({:?})", args.input.display(), format);
        println!("  Output: {}", args.output.display());
        println!();
    }

    let (data, dimension) = load_input(&args, format)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let count = if dimension == 0 { 0 } else { data.len() / dimension };

    if cli.verbose {
        println!("Writing {} vectors to {}...", count, args.output.display());
    }

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_shard(&args.output, &data, dimension)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    // Read back to make sure the shard decodes
    let (_, written_dim) = read_shard_file(&args.output, Some(1))?;
    anyhow::ensure!(written_dim == dimension, "Shard header dimension {} != {}", written_dim, dimension);

    if !cli.no_progress {
        println!("✅ Converted {} vectors of dimension {}", style(count).bold(), style(dimension).bold());
    }
    log::info!("Converted {} -> {} ({} vectors)", args.input.display(), args.output.display(), count);

    Ok(())
}

fn resolve_format(path: &Path, hint: InputFormat) -> InputFormat {
    match hint {
        InputFormat::Auto => match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("fvecs") => InputFormat::Fvecs,
            _ => InputFormat::Raw,
        },
        other => other,
    }
}

fn load_input(args: &ConvertArgs, format: InputFormat) -> anyhow::Result<(Vec<f32>, usize)> {
    match format {
        InputFormat::Fvecs => {
            let (data, dimension) = read_fvecs_file(&args.input, args.first_n)?;
            anyhow::ensure!(dimension > 0, "{} holds no vectors", args.input.display());
            Ok((data, dimension))
        }
        _ => {
            let dimension = args
                .dim
                .ok_or_else(|| anyhow::anyhow!("--dim is required for raw input"))?;
            let mut reader = BufReader::new(File::open(&args.input)?);
            Ok((read_raw_f32(&mut reader, dimension, args.first_n)?, dimension))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::write_fvecs;
    use tempfile::TempDir;

    fn quiet() -> crate::Cli {
        crate::Cli {
            verbose: false,
            no_progress: true,
        }
    }

    #[test]
    fn test_fvecs_to_shard_with_limit() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("vectors.fvecs");
        let data: Vec<f32> = (0..30).map(|i| i as f32).collect();
        write_fvecs(&input, &data, 3).unwrap();

        let output = dir.path().join("A").join("r0_i0.index");
        let args = ConvertArgs {
            input,
            output: output.clone(),
            format: InputFormat::Auto,
            dim: None,
            first_n: Some(4),
        };
        run(args, &quiet()).unwrap();

        let (read, dim) = read_shard_file(&output, None).unwrap();
        assert_eq!(dim, 3);
        assert_eq!(read, data[..12].to_vec());
    }

    #[test]
    fn test_raw_requires_dimension() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("dump.bin");
        std::fs::write(&input, [0u8; 32]).unwrap();

        let args = ConvertArgs {
            input: input.clone(),
            output: dir.path().join("out.index"),
            format: InputFormat::Auto,
            dim: None,
            first_n: None,
        };
        assert!(run(args, &quiet()).is_err());

        let args = ConvertArgs {
            input,
            output: dir.path().join("out.index"),
            format: InputFormat::Raw,
            dim: Some(2),
            first_n: None,
        };
        run(args, &quiet()).unwrap();
        let (read, dim) = read_shard_file(dir.path().join("out.index"), None).unwrap();
        assert_eq!(dim, 2);
        assert_eq!(read.len(), 8);
    }
}
