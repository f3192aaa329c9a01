//! The `gaugeread read` command: read one dataset image and score it.

use super::run::{resolve_image_root, Provider};
use anyhow::Context;
use clap::Args;
use gaugeread_core::{
    find_entry, load_dataset, AbortFlag, Config, DatasetEntry, Evaluator, ImageRef,
    InferenceEngine, Sample, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for the `read` command.
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Dataset file (JSON array of annotated images)
    pub dataset: PathBuf,

    /// Question id or image file name of the entry to read
    pub key: String,

    /// Directory image file names resolve against
    #[arg(short, long)]
    pub images: Option<PathBuf>,

    /// VLM provider (overrides `backend.provider`)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model name (provider-specific)
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Execute the read command. Prints the scored record as JSON on stdout.
pub async fn execute(args: ReadArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(provider) = args.provider {
        config.backend.provider = provider.to_string();
    }

    let entries = load_dataset(&args.dataset)
        .with_context(|| format!("Failed to load dataset {}", args.dataset.display()))?;
    let entry = select_entry(&entries, &args.key)?;

    let image_root = resolve_image_root(args.images.as_deref(), &config, &args.dataset);
    let path = entry.image_path(image_root.as_deref());
    let image = ImageRef::load(entry.file_name.clone(), &path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;

    let engine = InferenceEngine::from_config(
        &config,
        args.model.as_deref(),
        Arc::new(SystemClock),
        AbortFlag::new(),
    )?;
    tracing::info!(
        "Reading {} with {} / {}",
        entry.file_name,
        engine.provider(),
        engine.model()
    );

    let reading = engine.read(&image, &entry.metadata()).await;
    let record = Evaluator::from_config(&config).record(&Sample {
        file_id: entry.file_name.clone(),
        instrument_type: entry.instrument_type.clone(),
        scale_hint: entry.scale_hint.clone(),
        ground_truth: entry.ground_truth.clone(),
        reading,
    });

    let json = if config.output.pretty {
        serde_json::to_string_pretty(&record)?
    } else {
        serde_json::to_string(&record)?
    };
    println!("{json}");

    Ok(())
}

fn select_entry<'a>(entries: &'a [DatasetEntry], key: &str) -> anyhow::Result<&'a DatasetEntry> {
    find_entry(entries, key).ok_or_else(|| {
        anyhow::anyhow!(
            "No dataset entry matches '{key}' ({} entries; use a question_id or file_name)",
            entries.len()
        )
    })
}
