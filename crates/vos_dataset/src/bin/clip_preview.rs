use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vos_dataset::{
    read_split, summarize_index, validate_summary, DatasetConfig, DirectoryLoader,
    TrainingDataset, ValidationOutcome, ValidationThresholds,
};

#[derive(Parser, Debug)]
#[command(
    name = "clip_preview",
    about = "Validate a DAVIS-style dataset and draw a few training tuples"
)]
struct Args {
    /// Dataset root containing JPEGImages/ and Annotations/.
    #[arg(long)]
    root: PathBuf,
    /// Split name under ImageSets/ (every sequence directory when omitted).
    #[arg(long)]
    split: Option<String>,
    /// Optional TOML config; env overrides apply on top.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of tuples to draw.
    #[arg(long, default_value_t = 8)]
    samples: usize,
    /// Seed for the per-index generators.
    #[arg(long)]
    seed: Option<u64>,
}

fn sequence_dirs(root: &Path) -> Result<Vec<String>> {
    let images = root.join("JPEGImages");
    let mut names = Vec::new();
    for entry in fs::read_dir(&images).with_context(|| format!("read {}", images.display()))? {
        let entry = entry?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => DatasetConfig::from_path(path)?,
        None => DatasetConfig::default(),
    }
    .with_env_overrides();
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }

    let names = match &args.split {
        Some(split) => read_split(&args.root, split)?,
        None => sequence_dirs(&args.root)?,
    };
    let loader = Arc::new(DirectoryLoader::davis(&args.root));
    let dataset = TrainingDataset::new(loader, names, cfg).context("build dataset")?;

    let summary = summarize_index(&dataset.index(), dataset.config().seq_len);
    let report = validate_summary(summary, &ValidationThresholds::from_env());
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.outcome == ValidationOutcome::Fail {
        anyhow::bail!("validation failed: {}", report.reasons.join("; "));
    }

    let count = args.samples.min(dataset.len());
    let mut fallbacks = 0usize;
    let mut merged = 0usize;
    for i in 0..count {
        let sample = dataset.get(i).with_context(|| format!("sample {i}"))?;
        let diag = &sample.diagnostics;
        if !(diag.reference_valid && diag.gaps_valid && diag.consistent) {
            fallbacks += 1;
        }
        if diag.merged.is_some() {
            merged += 1;
        }
        let (height, width) = sample.reference.dims();
        tracing::info!(
            index = i,
            sequence = %sample.meta.seq_name,
            obj_num = sample.meta.obj_num,
            height,
            width,
            labeled = sample.labeled.iter().filter(|&&l| l).count(),
            reversed = diag.reversed,
            merged = diag.merged.is_some(),
            "sample"
        );
    }
    tracing::info!(count, fallbacks, merged, "preview done");
    Ok(())
}
