//! glyphsim: build metadata indexes and run resumable similarity workloads.
//!
//! Rasters are read from a pre-rendered directory tree
//! (`<renders>/<context>/<unit-id>.png`) and font coverage from a JSON
//! manifest.
//!
//! # Usage
//!
//! ```text
//! glyphsim index --renders DIR --manifest fonts.json --texts large.txt --out large.jsonl
//! glyphsim run --renders DIR --manifest fonts.json --workload latin.json \
//!     --checkpoint progress.jsonl --output results.json.gz
//! glyphsim compare a.png b.png
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use glyphsim_io::{
    CheckedRasterizer, DirectoryRasterizer, FontManifest, RunConfig, RunPaths, WorkerPool,
    Workload, build_index, read_texts, run, write_index,
};
use glyphsim_pipeline::{FontRegistry, Raster, ScoringConfig, compare_rasters};

/// Visual similarity scoring for rendered text units.
#[derive(Parser)]
#[command(name = "glyphsim", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the pixel-free metadata index of a text list.
    Index(IndexArgs),
    /// Score a workload, resuming from its checkpoint.
    Run(RunArgs),
    /// Print the SSIM of two raster files after normalization.
    Compare(CompareArgs),
}

/// Pre-rendered rasters and font coverage.
#[derive(Args)]
struct RenderArgs {
    /// Directory holding `<context>/<unit-id>.png` rasters.
    #[arg(long)]
    renders: PathBuf,

    /// Font coverage manifest (JSON).
    #[arg(long)]
    manifest: PathBuf,

    /// Midline row of every raster; defaults to half the canvas height.
    #[arg(long)]
    midline: Option<u32>,
}

impl RenderArgs {
    fn load(&self) -> Result<(CheckedRasterizer<DirectoryRasterizer>, FontManifest), String> {
        let mut rasterizer = DirectoryRasterizer::new(&self.renders);
        if let Some(midline) = self.midline {
            rasterizer = rasterizer.with_midline(midline);
        }
        let manifest = FontManifest::load(&self.manifest).map_err(|e| e.to_string())?;
        Ok((CheckedRasterizer::new(rasterizer), manifest))
    }
}

/// Scoring and execution settings.
#[derive(Args)]
struct ConfigArgs {
    /// Canonical image side length.
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_CANONICAL_SIZE)]
    canonical_size: u32,

    /// Ink threshold (a pixel is ink below 255 minus this).
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_INK_THRESHOLD)]
    ink_threshold: u8,

    /// Fingerprint gate when both units are one character.
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_PHASH_GATE_SINGLE)]
    phash_gate_single: f64,

    /// Fingerprint gate when either unit is a sequence.
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_PHASH_GATE_MULTI)]
    phash_gate_multi: f64,

    /// Maximum ratio between raw ink widths.
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_MAX_WIDTH_RATIO)]
    max_width_ratio: f64,

    /// Minimum ink coverage of each normalized side.
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_MIN_INK_COVERAGE)]
    min_ink_coverage: f64,

    /// Same-context SSIM counted as high-risk in the distribution.
    #[arg(long, default_value_t = ScoringConfig::DEFAULT_HIGH_SSIM)]
    high_ssim: f64,

    /// Fallback font context (repeatable).
    #[arg(long = "fallback-context")]
    fallback_contexts: Vec<String>,

    /// Worker threads; defaults to one less than the available cores.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    workers: Option<usize>,

    /// Full run config as a JSON file.
    ///
    /// When provided, the individual scoring flags are ignored.
    #[arg(long, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Full run config as a JSON string.
    ///
    /// When provided, the individual scoring flags are ignored.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build a [`RunConfig`] from CLI arguments.
///
/// A JSON config (string or file) replaces the individual scoring flags;
/// `--workers` applies either way.
fn config_from_cli(args: &ConfigArgs) -> Result<RunConfig, String> {
    let json = match (&args.config_json, &args.config) {
        (Some(json), _) => Some(json.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| format!("Error reading {}: {e}", path.display()))?,
        ),
        (None, None) => None,
    };
    let mut config = match json {
        Some(json) => serde_json::from_str::<RunConfig>(&json)
            .map_err(|e| format!("Error parsing config: {e}"))?,
        None => RunConfig {
            scoring: ScoringConfig {
                canonical_size: args.canonical_size,
                ink_threshold: args.ink_threshold,
                phash_gate_single: args.phash_gate_single,
                phash_gate_multi: args.phash_gate_multi,
                max_width_ratio: args.max_width_ratio,
                min_ink_coverage: args.min_ink_coverage,
                high_ssim: args.high_ssim,
                fallback_contexts: args.fallback_contexts.clone(),
            },
            workers: None,
        },
    };
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    config.scoring.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[derive(Args)]
struct IndexArgs {
    #[command(flatten)]
    renders: RenderArgs,

    /// Text units, one per line.
    #[arg(long)]
    texts: PathBuf,

    /// Index to write (JSON Lines).
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    renders: RenderArgs,

    /// Workload file (JSON).
    #[arg(long)]
    workload: PathBuf,

    /// Progress log; created if missing, resumed if present.
    #[arg(long)]
    checkpoint: PathBuf,

    /// Result document (gzip-compressed JSON).
    #[arg(long)]
    output: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct CompareArgs {
    /// First raster.
    a: PathBuf,

    /// Second raster.
    b: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

fn seed_canvas(
    rasterizer: &CheckedRasterizer<DirectoryRasterizer>,
    texts: &[String],
    manifest: &FontManifest,
) {
    if rasterizer.seed(texts, manifest.contexts()).is_none() {
        eprintln!("Warning: no raster found to fix the expected canvas");
    }
}

fn index(args: &IndexArgs) -> Result<ExitCode, String> {
    let config = config_from_cli(&args.config)?;
    let (rasterizer, manifest) = args.renders.load()?;
    let texts = read_texts(&args.texts).map_err(|e| e.to_string())?;
    seed_canvas(&rasterizer, &texts, &manifest);
    let pool = WorkerPool::new(config.worker_count()).map_err(|e| e.to_string())?;
    let entries = build_index(&texts, &rasterizer, &manifest, &config.scoring, &pool);
    write_index(&args.out, &entries).map_err(|e| e.to_string())?;
    eprintln!(
        "Indexed {} texts: {} entries written to {}",
        texts.len(),
        entries.len(),
        args.out.display(),
    );
    Ok(ExitCode::SUCCESS)
}

fn run_workload(args: &RunArgs) -> Result<ExitCode, String> {
    let config = config_from_cli(&args.config)?;
    let (rasterizer, manifest) = args.renders.load()?;
    let workload = Workload::load(&args.workload).map_err(|e| e.to_string())?;
    seed_canvas(&rasterizer, &workload.texts(), &manifest);
    let paths = RunPaths {
        checkpoint: args.checkpoint.clone(),
        output: args.output.clone(),
    };
    let report =
        run(&workload, &rasterizer, &manifest, &config, &paths).map_err(|e| e.to_string())?;

    eprintln!(
        "Units: {} ({} computed, {} resumed, {} incomplete)",
        report.units,
        report.computed,
        report.resumed,
        report.incomplete_units.len(),
    );
    eprintln!(
        "Pairs: {} ({} with same-context SSIM >= {})",
        report.pairs, report.distribution.high_ssim_pairs, report.distribution.high_ssim_threshold,
    );
    eprintln!(
        "Jobs: {} scored of {}; gated phash/width/coverage {}/{}/{}",
        report.counters.scored,
        report.counters.jobs,
        report.counters.phash_gated,
        report.counters.width_gated,
        report.counters.coverage_gated,
    );
    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        for unit in &report.incomplete_units {
            eprintln!("Incomplete unit: {unit}");
        }
        Ok(ExitCode::FAILURE)
    }
}

fn load_raster(path: &Path) -> Result<Raster, String> {
    let image = image::open(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?
        .to_luma8();
    Ok(Raster::centered(image))
}

fn compare(args: &CompareArgs) -> Result<ExitCode, String> {
    let config = config_from_cli(&args.config)?;
    let a = load_raster(&args.a)?;
    let b = load_raster(&args.b)?;
    println!("{:.6}", compare_rasters(&a, &b, &config.scoring));
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Index(args) => index(args),
        Command::Run(args) => run_workload(args),
        Command::Compare(args) => compare(args),
    };
    result.unwrap_or_else(|msg| {
        eprintln!("{msg}");
        ExitCode::FAILURE
    })
}
