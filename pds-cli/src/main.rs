//! PDS CLI application.
//!
//! Inspects PixeLINK Data Stream files and converts them to other formats.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pds_core::{ExporterRegistry, PdsReader};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

type FileRegistry = ExporterRegistry<BufReader<File>>;

/// PixeLINK Data Stream file converter.
///
/// Reads .pds recordings from PixeLINK cameras and prints their layout or
/// writes them out as NumPy arrays, multipage TIFF or CSV tables.
#[derive(Parser, Debug)]
#[command(name = "pds")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log decoder details (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a PDS file to another format
    Convert {
        /// Input PDS file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output file path
        ///
        /// The output format is determined by the file extension:
        /// - .npy: NumPy array (plus .txt timestamps)
        /// - .tif: Multipage TIFF (plus .txt timestamps)
        /// - .csv: Per-frame metadata table
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print information about a PDS file
    Info {
        /// Input PDS file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// List the supported output formats
    Formats,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let registry = FileRegistry::with_defaults();

    match args.command {
        Command::Convert {
            input,
            output,
            quiet,
        } => convert(&registry, &input, &output, quiet),
        Command::Info { input } => info_cmd(&input),
        Command::Formats => {
            for (ext, description) in registry.formats() {
                println!("{:<6} {}", ext, description);
            }
            Ok(())
        }
    }
}

fn info_cmd(input: &Path) -> Result<()> {
    let reader = PdsReader::open(input)
        .with_context(|| format!("Failed to open PDS file {:?}", input))?;

    println!("Frames: {}", reader.frames());
    println!("Image Size: {}", reader.image_size());
    println!("Pixel Format: {}", reader.pixel_format());
    Ok(())
}

fn convert(registry: &FileRegistry, input: &Path, output: &Path, quiet: bool) -> Result<()> {
    // Fail on the extension before touching the input
    let exporter = registry
        .for_path(output)
        .context("Unsupported output format")?;

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let start_time = Instant::now();

    progress.set_message(format!(
        "Reading {:?}...",
        input.file_name().unwrap_or_default()
    ));

    let mut reader = PdsReader::open(input)
        .with_context(|| format!("Failed to open PDS file {:?}", input))?;
    info!(
        frames = reader.frames(),
        size = %reader.image_size(),
        pixel_format = %reader.pixel_format(),
        "opened input"
    );

    progress.set_message(format!(
        "Writing {} to {:?}...",
        exporter.description,
        output.file_name().unwrap_or_default()
    ));

    (exporter.export)(&mut reader, output)
        .with_context(|| format!("Failed to write {} output", exporter.extension))?;
    reader.close();

    let total_duration = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! Converted {} frames in {:.2}s",
        reader.frames(),
        total_duration.as_secs_f64()
    ));

    if !quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", input);
        eprintln!("  Output:       {:?}", output);
        eprintln!("  Frames:       {}", reader.frames());
        eprintln!("  Image size:   {}", reader.image_size());
        eprintln!("  Pixel format: {}", reader.pixel_format());
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}
