//! Concurrent batch reading.
//!
//! One tokio task per image, bounded by a semaphore. Each task loads its
//! image from disk, asks the model and delivers the reading through a
//! callback as soon as it is ready, so the CLI can stream predictions.

use super::InferenceEngine;
use crate::types::{FailureKind, ImageRef, InstrumentMetadata, Reading};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One image to read.
#[derive(Debug, Clone)]
pub struct InferenceJob {
    /// Identifier results are keyed by (the dataset file name)
    pub file_id: String,
    /// Where the image lives on disk
    pub path: PathBuf,
    pub metadata: InstrumentMetadata,
}

impl InferenceEngine {
    /// Read a batch of images with at most `parallel` in flight.
    ///
    /// Calls `on_result` for each completed image. Once the abort flag is
    /// raised no new image is started, and images cut short by the abort
    /// are left out of the result so a later run can pick them up.
    pub async fn read_batch<F>(
        &self,
        jobs: Vec<InferenceJob>,
        on_result: F,
    ) -> BTreeMap<String, Reading>
    where
        F: Fn(&str, &Reading) + Send + Sync + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let on_result = Arc::new(on_result);
        let mut handles = Vec::with_capacity(jobs.len());

        tracing::info!(
            "Reading {} images with {} workers ({} / {})",
            jobs.len(),
            self.parallel,
            self.provider(),
            self.model
        );

        for job in jobs {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::warn!("Worker semaphore closed unexpectedly, stopping batch");
                break;
            };
            if self.abort.is_aborted() {
                tracing::info!("Abort requested, not starting further images");
                break;
            }

            let engine = self.clone();
            let on_result = on_result.clone();

            handles.push(tokio::spawn(async move {
                let reading = engine.read_job(&job).await;
                drop(permit); // Release before the callback
                if reading.failure == Some(FailureKind::Aborted) {
                    tracing::debug!("{} was aborted before completing", job.file_id);
                    return None;
                }
                on_result(&job.file_id, &reading);
                Some((job.file_id, reading))
            }));
        }

        let mut results = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok(Some((file_id, reading))) => {
                    results.insert(file_id, reading);
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Inference task panicked: {e}"),
            }
        }
        results
    }

    async fn read_job(&self, job: &InferenceJob) -> Reading {
        match ImageRef::load(job.file_id.clone(), &job.path).await {
            Ok(image) => self.read(&image, &job.metadata).await,
            Err(e) => {
                tracing::warn!("Failed to read image {:?}: {e}", job.path);
                Reading::failed(
                    FailureKind::IoError,
                    format!("[io_error: failed to read {}: {e}]", job.path.display()),
                )
            }
        }
    }
}
