//! Inference engine: prompt, ask, parse.
//!
//! [`InferenceEngine::read`] turns one image plus its metadata into a typed
//! [`Reading`]. It never fails: client errors and unparseable answers come
//! back as failed readings so one bad image cannot stop a batch.

mod batch;
pub mod parser;
pub mod prompt;

pub use batch::InferenceJob;
pub use parser::{AnswerParser, CalculateScan, Candidate, Extractor, Permissive, StructuredTail};
pub use prompt::build_prompt;

use crate::abort::AbortFlag;
use crate::client::VlmClient;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ClientError, ConfigError};
use crate::types::{FailureKind, ImageRef, InstrumentMetadata, Reading};
use std::sync::Arc;

/// Reads instruments through a [`VlmClient`]. Cheap to clone.
#[derive(Clone)]
pub struct InferenceEngine {
    client: Arc<VlmClient>,
    parser: Arc<AnswerParser>,
    model: String,
    parallel: usize,
    abort: AbortFlag,
}

impl InferenceEngine {
    pub fn new(client: Arc<VlmClient>, parser: AnswerParser, model: impl Into<String>) -> Self {
        Self {
            client,
            parser: Arc::new(parser),
            model: model.into(),
            parallel: 4,
            abort: AbortFlag::new(),
        }
    }

    /// Wire up client, parser and worker count from configuration.
    pub fn from_config(
        config: &Config,
        model_override: Option<&str>,
        clock: Arc<dyn Clock>,
        abort: AbortFlag,
    ) -> Result<Self, ConfigError> {
        let client = VlmClient::from_config(config, clock, abort.clone())?;
        Ok(Self::new(
            Arc::new(client),
            AnswerParser::new(config.unit_table()),
            config.model_name(model_override),
        )
        .with_parallel(config.processing.parallel_workers)
        .with_abort(abort))
    }

    /// Maximum concurrent images in [`read_batch`](Self::read_batch).
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self
    }

    pub fn with_abort(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    /// Read one instrument image.
    pub async fn read(&self, image: &ImageRef, metadata: &InstrumentMetadata) -> Reading {
        let prompt = build_prompt(metadata);

        match self.client.ask(image, &prompt, &self.model).await {
            Ok(text) => {
                let reading = self.parser.parse(&text, metadata.scale_hint.as_ref());
                if reading.is_failed() {
                    tracing::warn!("No reading could be parsed for {}", image.file_id);
                } else {
                    tracing::debug!(
                        "{}: {} {} via {}",
                        image.file_id,
                        reading.value.unwrap_or_default(),
                        reading.unit.as_deref().unwrap_or_default(),
                        reading.extractor.as_deref().unwrap_or_default()
                    );
                }
                reading
            }
            Err(e) => {
                tracing::warn!("VLM call failed for {}: {e}", image.file_id);
                client_failure(&e)
            }
        }
    }
}

/// Failed reading for a client error, tagged with the error kind.
pub fn client_failure(error: &ClientError) -> Reading {
    match error {
        ClientError::ExhaustedRetries { .. } => Reading::failed(
            FailureKind::ExhaustedRetries,
            format!("[{}: {error}]", error.kind()),
        ),
        ClientError::FatalProvider(message) => Reading::failed(
            FailureKind::FatalProvider,
            format!("[{}: {message}]", error.kind()),
        ),
        ClientError::Aborted(_) => {
            Reading::failed(FailureKind::Aborted, format!("[{}]", error.kind()))
        }
    }
}
