//! The `gaugeread evaluate` command: offline scoring of saved predictions.

use anyhow::Context;
use clap::Args;
use super::run::Provider;
use gaugeread_core::{
    join, load_dataset, load_prediction_file, Config, Evaluator, PredictionFile, ReportDocument,
};
use std::path::PathBuf;

/// Arguments for the `evaluate` command.
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Dataset file (JSON array of annotated images)
    pub dataset: PathBuf,

    /// Predictions file written by `gaugeread run`
    pub predictions: PathBuf,

    /// Report file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Provider named in the report (defaults to the one recorded in the
    /// predictions file, then `backend.provider`)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Model named in the report (defaults to the one recorded in the
    /// predictions file, then the configured model)
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Execute the evaluate command.
pub async fn execute(args: EvaluateArgs, config: Config) -> anyhow::Result<()> {
    let entries = load_dataset(&args.dataset)
        .with_context(|| format!("Failed to load dataset {}", args.dataset.display()))?;
    let file = load_prediction_file(&args.predictions).with_context(|| {
        format!(
            "Failed to read predictions {}",
            args.predictions.display()
        )
    })?;
    let (provider, model) = report_source(&args, &file, &config);
    let predictions = file.readings;

    let unmatched = predictions
        .keys()
        .filter(|name| !entries.iter().any(|e| &e.file_name == *name))
        .count();
    if unmatched > 0 {
        tracing::warn!("{unmatched} prediction(s) have no dataset entry and were ignored");
    }

    let report = Evaluator::from_config(&config).evaluate(&join(&entries, &predictions));
    let document = ReportDocument::new(&entries, &report, &provider, &model);

    match &args.output {
        Some(path) => {
            document
                .save(path, config.output.pretty)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            tracing::info!("Report written to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&document)?),
    }

    super::print_summary(&report, 0, None);

    Ok(())
}

/// Command-line flags, then what the predictions file recorded, then config.
fn report_source(args: &EvaluateArgs, file: &PredictionFile, config: &Config) -> (String, String) {
    let provider = args
        .provider
        .map(|p| p.to_string())
        .or_else(|| file.provider.clone())
        .unwrap_or_else(|| config.backend.provider.clone());
    let model = args
        .model
        .clone()
        .or_else(|| file.model.clone())
        .unwrap_or_else(|| config.model_name(None));
    (provider, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaugeread_core::{PredictionsWriter, Reading};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_evaluate_writes_report() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("dataset.json");
        std::fs::write(
            &dataset,
            r#"[{"file_name": "a.jpg", "instrument_type": "pressure_gauge",
                 "ground_truth": {"value": 50, "unit": "psi"}}]"#,
        )
        .unwrap();

        let predictions = dir.path().join("preds.jsonl");
        PredictionsWriter::append(&predictions)
            .unwrap()
            .with_source("openai", "gpt-4o-mini")
            .write(
                "a.jpg",
                &Reading::parsed(49.5, "psi", None, "Answer: 49.5 psi", "structured_tail"),
            )
            .unwrap();

        let output = dir.path().join("report.json");
        let args = EvaluateArgs {
            dataset,
            predictions,
            output: Some(output.clone()),
            provider: None,
            model: None,
        };
        execute(args, Config::default()).await.unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(report["metrics"]["mae"], 0.5);
        assert_eq!(report["metrics"]["n_failed_parses"], 0);
        // Named after the run that produced the predictions, not the local config
        assert_eq!(report["provider"], "openai");
        assert_eq!(report["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_report_source_precedence() {
        let config = Config::default();
        let mut args = EvaluateArgs {
            dataset: PathBuf::from("dataset.json"),
            predictions: PathBuf::from("preds.jsonl"),
            output: None,
            provider: None,
            model: None,
        };
        let mut file = PredictionFile::default();

        assert_eq!(
            report_source(&args, &file, &config),
            (config.backend.provider.clone(), config.model_name(None))
        );

        file.provider = Some("openai".to_string());
        file.model = Some("gpt-4o".to_string());
        assert_eq!(
            report_source(&args, &file, &config),
            ("openai".to_string(), "gpt-4o".to_string())
        );

        args.provider = Some(Provider::Google);
        args.model = Some("gemini-2.5-pro".to_string());
        assert_eq!(
            report_source(&args, &file, &config),
            ("google".to_string(), "gemini-2.5-pro".to_string())
        );
    }
}
