// src/main.rs
// ─────────────────────────────────────────────────────────────────────────────
// Duet batch CLI
//
//  ❯ cargo run --release -- --jsonl scripts.jsonl --output-dir outputs
//  ❯ cargo run --release -- --worker ./worker.sh --strategy eager --cpu
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info, warn};

use duet::{
    BackendInitializer, BatchOrchestrator, CandleDeviceProbe, CommandFactory, DuetConfig,
    GenerationParams, RequestBuilder, build_batch, load_records, persist, progress_bar,
    sample_records, setup, summarize, write_report, write_text_summary,
};
use duet_domain::{BatchReport, DuetResult, ExecutionStrategy, Precision, RequestItem};

/// CLI switches. Anything given here overrides the config file.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record stream, one JSON object per line. Built-in samples when
    /// omitted or missing.
    #[arg(long)]
    jsonl: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Also write the texts used per item as JSONL.
    #[arg(long)]
    summary_file: Option<PathBuf>,

    /// Skip text normalization for records that do not ask for it.
    #[arg(long)]
    no_normalize: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Only process the first N records.
    #[arg(long)]
    max_samples: Option<usize>,

    #[arg(long)]
    dtype: Option<Precision>,

    /// Candidate execution strategy; repeat to set the fallback order.
    #[arg(long = "strategy")]
    strategies: Vec<ExecutionStrategy>,

    /// Force CPU execution (otherwise CUDA/Metal if available).
    #[arg(long)]
    cpu: bool,

    /// Worker program that hosts the model.
    #[arg(long)]
    worker: Option<String>,

    /// Extra argument for the worker, placed before its sub-command.
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    worker_args: Vec<String>,

    #[arg(long)]
    worker_timeout_secs: Option<u64>,

    /// Abort when any record is rejected instead of skipping it.
    #[arg(long)]
    strict: bool,

    /// Reject records that give prompt audio for only one speaker.
    #[arg(long)]
    strict_roles: bool,

    /// Give up on the whole run after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup::init_tracing();
    let args = Args::parse();

    // ───────────── Config ─────────────────────────────────────────────────
    let mut cfg = match &args.config {
        Some(path) => DuetConfig::load(path)?,
        None => DuetConfig::default(),
    };
    apply_overrides(&mut cfg, &args);
    cfg.validate()?;

    // ───────────── Records → items ────────────────────────────────────────
    let mut records = match &args.jsonl {
        Some(path) if path.is_file() => load_records(path)?,
        Some(path) => {
            warn!(path = %path.display(), "record file not found, using built-in samples");
            sample_records()
        }
        None => {
            warn!("no record file given, using built-in samples");
            sample_records()
        }
    };
    if let Some(limit) = args.max_samples {
        records.truncate(limit);
    }

    let builder = RequestBuilder::default()
        .strict_roles(args.strict_roles)
        .default_normalize(cfg.generation.use_normalize);
    let batch = build_batch(&records, &builder);
    if args.strict
        && let Some(first) = batch.rejected.first()
    {
        bail!("record {} rejected: {}", first.record, first.reason);
    }
    if batch.items.is_empty() {
        warn!("no usable records, the report will be empty");
    }

    setup::prepare_output_dir(&cfg.output.output_dir)?;

    // ───────────── Backend + generation (blocking) ────────────────────────
    let job_cfg = cfg.clone();
    let items = batch.items;
    let deadline = args.deadline_secs.map(Duration::from_secs);
    let report = setup::run_blocking_with_deadline(deadline, move || run(job_cfg, items))
        .await?
        .inspect_err(|e| error!(code = e.code(), error = %e, "run failed"))?
        .with_rejected(batch.rejected);

    // ───────────── Report ─────────────────────────────────────────────────
    write_report(&report, &cfg.output.report_path())?;

    println!(
        "Saved {}/{} audio files to {}",
        report.written(),
        report.total,
        cfg.output.output_dir.display()
    );
    Ok(())
}

fn run(cfg: DuetConfig, items: Vec<RequestItem>) -> DuetResult<BatchReport> {
    let initializer = BackendInitializer::new(
        cfg.backend.model_refs(),
        cfg.backend.strategies.clone(),
        Arc::new(CommandFactory::new(cfg.backend.worker.clone())),
        Arc::new(CandleDeviceProbe::new(cfg.backend.force_cpu)),
    );
    let handle = initializer.get_backend()?;

    let params = GenerationParams {
        system_prompt: cfg.generation.system_prompt.clone(),
        seed: cfg.generation.seed,
    };
    if let Some(seed) = params.seed {
        info!(seed, "set random seed");
    }
    let outcomes = BatchOrchestrator::new(&handle)
        .params(params)
        .progress(progress_bar(items.len()))
        .run(&items);

    let artifacts = persist(&outcomes, &cfg.output.output_dir, &cfg.output.file_prefix);
    let report = summarize(
        &items,
        &outcomes,
        &artifacts,
        handle.meta(cfg.generation.use_normalize),
    );
    if let Some(path) = &cfg.output.summary_file
        && let Err(e) = write_text_summary(&outcomes, path)
    {
        warn!(error = %e, "failed to write text summary");
    }

    drop(handle);
    initializer.release();
    report
}

fn apply_overrides(cfg: &mut DuetConfig, args: &Args) {
    if let Some(dir) = &args.output_dir {
        cfg.output.output_dir = dir.clone();
    }
    if let Some(path) = &args.summary_file {
        cfg.output.summary_file = Some(path.clone());
    }
    if args.no_normalize {
        cfg.generation.use_normalize = false;
    }
    if args.seed.is_some() {
        cfg.generation.seed = args.seed;
    }
    if let Some(dtype) = args.dtype {
        cfg.backend.precision = dtype;
    }
    if !args.strategies.is_empty() {
        cfg.backend.strategies = args.strategies.clone();
    }
    if args.cpu {
        cfg.backend.force_cpu = true;
    }
    if let Some(worker) = &args.worker {
        cfg.backend.worker.program = worker.clone();
    }
    if !args.worker_args.is_empty() {
        cfg.backend.worker.args = args.worker_args.clone();
    }
    if args.worker_timeout_secs.is_some() {
        cfg.backend.worker.timeout_secs = args.worker_timeout_secs;
    }
}
