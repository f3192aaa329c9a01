//! gaugeread CLI - read measurement instruments from images with VLMs.
//!
//! Each image in a dataset is sent to a vision-language model with a
//! step-by-step prompt; the answers are parsed into typed readings and
//! scored against the annotated ground truth.
//!
//! # Usage
//!
//! ```bash
//! # Read every image in a dataset and write a report
//! gaugeread run dataset.json --images ./images --output report.json
//!
//! # Resume an interrupted run
//! gaugeread run dataset.json --predictions preds.jsonl --skip-existing
//!
//! # Read a single image by question id or file name
//! gaugeread read dataset.json q_0042
//!
//! # Re-score saved predictions without calling a provider
//! gaugeread evaluate dataset.json preds.jsonl
//!
//! # View configuration
//! gaugeread config show
//! ```

use clap::{Parser, Subcommand};
use gaugeread_core::Config;
use std::path::{Path, PathBuf};

mod cli;
mod logging;

/// gaugeread - read gauges, meters and scales with vision-language models.
#[derive(Parser, Debug)]
#[command(name = "gaugeread")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "GAUGEREAD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Read every image in a dataset and score the predictions
    Run(cli::run::RunArgs),

    /// Read one dataset image and print its scored record
    Read(cli::read::ReadArgs),

    /// Score saved predictions against a dataset (no provider calls)
    Evaluate(cli::evaluate::EvaluateArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let config = load_config(cli.config.as_deref())?;
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("gaugeread v{}", gaugeread_core::VERSION);

    match cli.command {
        Commands::Run(args) => cli::run::execute(args, config).await,
        Commands::Read(args) => cli::read::execute(args, config).await,
        Commands::Evaluate(args) => cli::evaluate::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, cli.config.as_deref()).await,
    }
}

/// An explicit `--config` must load; the default location falls back to defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return Config::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()));
    }

    match Config::load() {
        Ok(config) => Ok(config),
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `gaugeread config path`."
            );
            Ok(Config::default())
        }
    }
}
