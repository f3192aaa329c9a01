//! gaugeread core - reading measurement instruments with vision-language models.
//!
//! An image of a gauge, meter or scale goes to a VLM together with a
//! chain-of-thought prompt; the free-text answer is parsed into a typed
//! [`Reading`] and scored against ground truth.
//!
//! # Architecture
//!
//! ```text
//! Image + Metadata → InferenceEngine → VlmClient → CredentialPool → VlmBackend → provider
//!                          ↓
//!                    AnswerParser → Reading → Evaluator → Report
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use gaugeread_core::{Config, InferenceEngine, SystemClock, AbortFlag, ImageRef, InstrumentMetadata};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> gaugeread_core::Result<()> {
//!     let config = Config::load()?;
//!     let engine = InferenceEngine::from_config(&config, None, Arc::new(SystemClock), AbortFlag::new())?;
//!
//!     let image = ImageRef::load("gauge.jpg", "./gauge.jpg".as_ref()).await?;
//!     let reading = engine.read(&image, &InstrumentMetadata::new("pressure_gauge")).await;
//!     println!("{:?} {:?}", reading.value, reading.unit);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod abort;
pub mod backend;
pub mod client;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod inference;
pub mod output;
pub mod types;
pub mod units;

// Re-exports for convenient access
pub use abort::AbortFlag;
pub use backend::{BackendFactory, BackendRequest, ProviderResponse, VlmBackend};
pub use client::{ClientOptions, VlmClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use credentials::{CredentialHandle, CredentialPool, PoolOptions};
pub use dataset::{find_entry, load_dataset, DatasetEntry};
pub use error::{ClientError, ConfigError, DatasetError, GaugeError, Result};
pub use evaluation::{join, Check, EvaluationRecord, Evaluator, Report, Sample};
pub use inference::{AnswerParser, InferenceEngine, InferenceJob};
pub use output::{
    load_prediction_file, load_predictions, PredictionFile, PredictionsWriter, ReportDocument,
};
pub use types::{
    FailureKind, GroundTruth, ImageRef, InstrumentMetadata, InstrumentType, ProviderStatus,
    Reading, ScaleHint,
};
pub use units::UnitTable;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_builds_evaluator() {
        let config = Config::default();
        assert_eq!(config.processing.parallel_workers, 4);
        let evaluator = Evaluator::from_config(&config);
        let report = evaluator.evaluate(&[]);
        assert_eq!(report.n_samples, 0);
    }
}
