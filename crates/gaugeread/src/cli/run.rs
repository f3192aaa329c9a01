//! The `gaugeread run` command: inference over a dataset, then evaluation.

use anyhow::Context;
use clap::{Args, ValueEnum};
use gaugeread_core::{
    join, load_dataset, load_predictions, AbortFlag, Config, DatasetEntry, Evaluator,
    InferenceEngine, InferenceJob, PredictionsWriter, Reading, ReportDocument, SystemClock,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Dataset file (JSON array of annotated images)
    #[arg(required = true)]
    pub dataset: PathBuf,

    /// Directory image file names resolve against
    /// (defaults to `processing.image_root`, then the dataset's directory)
    #[arg(short, long)]
    pub images: Option<PathBuf>,

    /// Report file
    #[arg(short, long, default_value = "report.json")]
    pub output: PathBuf,

    /// Per-image predictions file, appended as images complete
    /// (defaults to the report path with a .jsonl extension)
    #[arg(long)]
    pub predictions: Option<PathBuf>,

    /// Skip images already present in the predictions file
    #[arg(long)]
    pub skip_existing: bool,

    /// VLM provider (overrides `backend.provider`)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name (provider-specific)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Number of images read concurrently (overrides `processing.parallel_workers`)
    #[arg(short, long)]
    pub parallel: Option<usize>,
}

/// Supported VLM providers.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Provider {
    /// Google Gemini API
    Google,
    /// OpenAI API
    Openai,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Google => write!(f, "google"),
            Provider::Openai => write!(f, "openai"),
        }
    }
}

/// Execute the run command.
pub async fn execute(args: RunArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(provider) = args.provider {
        config.backend.provider = provider.to_string();
    }
    if let Some(parallel) = args.parallel {
        if parallel == 0 {
            anyhow::bail!("--parallel must be at least 1");
        }
        config.processing.parallel_workers = parallel;
    }

    let entries = load_dataset(&args.dataset)
        .with_context(|| format!("Failed to load dataset {}", args.dataset.display()))?;
    tracing::info!("Loaded {} dataset entries", entries.len());

    let image_root = image_root(&args, &config);
    let predictions_path = args
        .predictions
        .clone()
        .unwrap_or_else(|| args.output.with_extension("jsonl"));

    let existing = if args.skip_existing && predictions_path.exists() {
        let existing = load_predictions(&predictions_path)?;
        tracing::info!(
            "Loaded {} existing predictions from {:?}",
            existing.len(),
            predictions_path
        );
        existing
    } else {
        if !args.skip_existing && predictions_path.exists() {
            tracing::warn!("Overwriting predictions file {:?}", predictions_path);
        }
        std::fs::File::create(&predictions_path)?;
        BTreeMap::new()
    };

    let abort = AbortFlag::new();
    spawn_interrupt_handler(abort.clone());

    let engine = InferenceEngine::from_config(
        &config,
        args.model.as_deref(),
        Arc::new(SystemClock),
        abort.clone(),
    )?;

    let jobs = pending_jobs(&entries, &existing, image_root.as_deref());
    let skipped = entries.len() - jobs.len();
    if skipped > 0 {
        tracing::info!("Skipping {} already-read images", skipped);
    }

    let start_time = std::time::Instant::now();
    let progress = create_progress_bar(jobs.len() as u64);
    let writer = Arc::new(
        PredictionsWriter::append(&predictions_path)?.with_source(engine.provider(), engine.model()),
    );

    let on_result = {
        let progress = progress.clone();
        let writer = Arc::clone(&writer);
        move |file_name: &str, reading: &Reading| {
            if let Err(e) = writer.write(file_name, reading) {
                tracing::error!("Failed to append prediction for {file_name}: {e}");
            }
            if reading.is_failed() {
                tracing::debug!("No reading for {file_name}: {}", reading.raw_rationale);
            }
            progress.inc(1);
            let elapsed = start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                progress.set_message(format!("{:.2} img/sec", progress.position() as f64 / elapsed));
            }
        }
    };

    let fresh = engine.read_batch(jobs, on_result).await;
    progress.finish_and_clear();
    tracing::info!(
        "Wrote {} predictions to {:?}",
        writer.items_written(),
        predictions_path
    );

    let mut predictions = existing;
    predictions.extend(fresh);

    if abort.is_aborted() {
        let missing = unread_count(&entries, &predictions);
        tracing::warn!(
            "Run interrupted: {missing} image(s) unread; resume with --skip-existing"
        );
    }

    let report = Evaluator::from_config(&config).evaluate(&join(&entries, &predictions));
    ReportDocument::new(&entries, &report, engine.provider(), engine.model())
        .save(&args.output, config.output.pretty)
        .with_context(|| format!("Failed to write report {}", args.output.display()))?;
    tracing::info!("Report written to {:?}", args.output);

    super::print_summary(&report, skipped, Some(start_time.elapsed()));

    Ok(())
}

/// `--images`, then the configured root, then the dataset's own directory.
fn image_root(args: &RunArgs, config: &Config) -> Option<PathBuf> {
    resolve_image_root(args.images.as_deref(), config, &args.dataset)
}

pub(crate) fn resolve_image_root(
    images: Option<&Path>,
    config: &Config,
    dataset: &Path,
) -> Option<PathBuf> {
    images
        .map(Path::to_path_buf)
        .or_else(|| config.processing.image_root_path())
        .or_else(|| dataset.parent().map(Path::to_path_buf))
}

/// Dataset entries without a prediction. Predictions for names no longer in
/// the dataset do not count.
fn unread_count(entries: &[DatasetEntry], predictions: &BTreeMap<String, Reading>) -> usize {
    entries
        .iter()
        .filter(|entry| !predictions.contains_key(&entry.file_name))
        .count()
}

/// One job per dataset entry that has no prediction yet.
fn pending_jobs(
    entries: &[DatasetEntry],
    existing: &BTreeMap<String, Reading>,
    image_root: Option<&Path>,
) -> Vec<InferenceJob> {
    entries
        .iter()
        .filter(|entry| !existing.contains_key(&entry.file_name))
        .map(|entry| InferenceJob {
            file_id: entry.file_name.clone(),
            path: entry.image_path(image_root),
            metadata: entry.metadata(),
        })
        .collect()
}

/// Ctrl-C stops new images from starting; in-flight ones finish or abort.
fn spawn_interrupt_handler(abort: AbortFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after in-flight images");
            abort.abort();
        }
    });
}

/// Create a progress bar for batch inference.
fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_message("starting...");
    pb
}
