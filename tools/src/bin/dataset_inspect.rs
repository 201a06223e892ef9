use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yolo_dataset::{
    summarize_with_thresholds, CsvManifestSource, DatasetConfig, TransformPipeline,
    ValidationOutcome, ValidationReport, ValidationThresholds, YoloDataset,
};
use yolo_dataset_tools::CoverageReport;

#[derive(Parser, Debug)]
#[command(
    name = "dataset_inspect",
    about = "Validate a YOLO manifest and report anchor coverage for sampled items"
)]
struct Args {
    /// CSV manifest with image and label columns.
    #[arg(long)]
    manifest: PathBuf,
    /// Directory holding the images named in the manifest.
    #[arg(long)]
    img_dir: PathBuf,
    /// Directory holding the label files named in the manifest.
    #[arg(long)]
    label_dir: PathBuf,
    /// Optional TOML dataset config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of items to run through mosaic and encoding.
    #[arg(long, default_value_t = 16)]
    samples: usize,
    /// Emit a JSON document instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct InspectOutput {
    validation: ValidationReport,
    coverage: CoverageReport,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => DatasetConfig::from_path(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => DatasetConfig::default(),
    }
    .with_env_overrides();
    cfg.validate().context("validate config")?;
    info!("{}", cfg.describe());

    let source = CsvManifestSource::open(&args.manifest, &args.img_dir, &args.label_dir)
        .with_context(|| format!("open manifest {}", args.manifest.display()))?;
    let validation = summarize_with_thresholds(&source, &ValidationThresholds::from_env());

    let dataset =
        YoloDataset::new(source, &cfg)?.with_transform(TransformPipeline::eval(cfg.image_size));
    let mut coverage = CoverageReport::default();
    for index in 0..args.samples.min(dataset.len()) {
        match dataset.get_with_stats(index) {
            Ok((item, stats)) => coverage.record(&item, &stats),
            Err(err) => {
                warn!(index, "skipping item: {err}");
                coverage.record_failure();
            }
        }
    }

    let fail = validation.outcome == ValidationOutcome::Fail;
    if args.json {
        let out = InspectOutput {
            validation,
            coverage,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_text(&validation, &coverage);
    }
    if fail {
        anyhow::bail!("manifest validation failed");
    }
    Ok(())
}

fn print_text(validation: &ValidationReport, coverage: &CoverageReport) {
    let s = &validation.summary;
    println!(
        "manifest {}: {} entries, {} boxes \
         ({} empty, {} missing image, {} missing label, {} invalid)",
        s.manifest.display(),
        s.total,
        s.boxes,
        s.empty,
        s.missing_image,
        s.missing_label,
        s.invalid_label
    );
    println!("validation: {}", validation.outcome.as_str());
    for reason in &validation.reasons {
        println!("  - {reason}");
    }
    println!(
        "sampled {} items ({} failed): {} boxes, {} degenerate, {} uncovered, coverage {:.1}%",
        coverage.items,
        coverage.failed,
        coverage.boxes,
        coverage.skipped_degenerate,
        coverage.uncovered,
        coverage.covered_ratio() * 100.0
    );
    for scale in &coverage.scales {
        println!(
            "  grid {:>3}: {} positive, {} ignored",
            scale.grid, scale.positives, scale.ignored
        );
    }
}
