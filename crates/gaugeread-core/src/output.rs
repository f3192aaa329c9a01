//! Report and predictions persistence.
//!
//! Two files come out of a run: a predictions file (JSON Lines, one reading
//! per image, appended as results arrive so an interrupted run can resume)
//! and a report document (one JSON object with per-image results and the
//! aggregate metrics).

use crate::dataset::DatasetEntry;
use crate::evaluation::{Accuracy, Check, Report};
use crate::types::{GroundTruth, InstrumentType, Reading, ScaleHint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single JSON document
    Json,
    /// One JSON object per line
    JsonLines,
}

/// Serializes items as JSON or JSON Lines.
pub struct OutputWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    pretty: bool,
    items_written: usize,
}

impl<W: Write> OutputWriter<W> {
    /// `pretty` only affects the JSON format.
    pub fn new(writer: W, format: OutputFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
            items_written: 0,
        }
    }

    pub fn write<T: Serialize>(&mut self, item: &T) -> io::Result<()> {
        match self.format {
            OutputFormat::Json if self.pretty => {
                serde_json::to_writer_pretty(&mut self.writer, item).map_err(io::Error::other)?;
            }
            // JSONL is never pretty-printed (one object per line)
            OutputFormat::Json | OutputFormat::JsonLines => {
                serde_json::to_writer(&mut self.writer, item).map_err(io::Error::other)?;
            }
        }
        writeln!(self.writer)?;
        self.items_written += 1;
        Ok(())
    }

    pub fn items_written(&self) -> usize {
        self.items_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// One line of the predictions file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLine {
    pub file_name: String,
    pub reading: Reading,
    /// Provider that produced the reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Appends prediction lines to a file, flushing after each one.
///
/// Shared between batch workers through the callback, hence the mutex.
pub struct PredictionsWriter {
    inner: Mutex<OutputWriter<BufWriter<File>>>,
    provider: Option<String>,
    model: Option<String>,
}

impl PredictionsWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Mutex::new(OutputWriter::new(
                BufWriter::new(file),
                OutputFormat::JsonLines,
                false,
            )),
            provider: None,
            model: None,
        })
    }

    /// Stamp every line with the provider and model that produced it.
    pub fn with_source(mut self, provider: &str, model: &str) -> Self {
        self.provider = Some(provider.to_string());
        self.model = Some(model.to_string());
        self
    }

    pub fn write(&self, file_name: &str, reading: &Reading) -> io::Result<()> {
        let line = PredictionLine {
            file_name: file_name.to_string(),
            reading: reading.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
        };
        let mut writer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        writer.write(&line)?;
        writer.flush()
    }

    pub fn items_written(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items_written()
    }
}

/// Contents of a predictions file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionFile {
    pub readings: BTreeMap<String, Reading>,
    /// Provider named by the last stamped line, if any
    pub provider: Option<String>,
    /// Model named by the last stamped line, if any
    pub model: Option<String>,
}

/// Read a predictions file into a map keyed by file name.
///
/// Later lines win. Blank and malformed lines (a partially written last
/// line after a crash) are skipped with a warning. Readings that break the
/// value/unit invariant are loaded as parse failures.
pub fn load_prediction_file(path: &Path) -> io::Result<PredictionFile> {
    let reader = BufReader::new(File::open(path)?);
    let mut file = PredictionFile::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PredictionLine>(&line) {
            Ok(p) => {
                let had_value = p.reading.value.is_some();
                let reading = p.reading.validated();
                if had_value && reading.is_failed() {
                    tracing::warn!(
                        "Line {} in {:?}: value for {} has no usable unit, treating as failed",
                        index + 1,
                        path,
                        p.file_name
                    );
                }
                if p.provider.is_some() {
                    file.provider = p.provider;
                }
                if p.model.is_some() {
                    file.model = p.model;
                }
                file.readings.insert(p.file_name, reading);
            }
            Err(e) => tracing::warn!("Skipping malformed line {} in {:?}: {e}", index + 1, path),
        }
    }
    Ok(file)
}

/// Just the readings of a predictions file.
pub fn load_predictions(path: &Path) -> io::Result<BTreeMap<String, Reading>> {
    load_prediction_file(path).map(|file| file.readings)
}

// --- Report document ---

/// Predicted value as shown in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicted {
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub confidence: Option<f64>,
}

/// One image in the report: the dataset entry plus prediction and checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub instrument_type: InstrumentType,
    pub ground_truth: GroundTruth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_hint: Option<ScaleHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub predicted: Predicted,
    pub abs_error: Option<f64>,
    pub unit_consistent: Check,
    pub in_range: Check,
    pub tick_aligned: Check,
    pub value_correct: Check,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub raw_rationale: String,
}

/// Aggregate block at the top of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBlock {
    pub mae: Option<f64>,
    pub mse: Option<f64>,
    pub r2: Option<f64>,
    pub n_samples: usize,
    pub n_failed_parses: usize,
    pub accuracy: Option<Accuracy>,
}

/// The full report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub provider: String,
    pub model: String,
    pub metrics: MetricsBlock,
    pub results: Vec<ResultRow>,
}

impl ReportDocument {
    /// Combine dataset entries with an evaluation of the same entries.
    ///
    /// `report.per_sample` must be in dataset order, which is what
    /// `evaluation::join` produces.
    pub fn new(entries: &[DatasetEntry], report: &Report, provider: &str, model: &str) -> Self {
        let results = entries
            .iter()
            .zip(&report.per_sample)
            .map(|(entry, record)| ResultRow {
                file_name: entry.file_name.clone(),
                question_id: entry.question_id.clone(),
                instrument_type: entry.instrument_type.clone(),
                ground_truth: entry.ground_truth.clone(),
                scale_hint: entry.scale_hint.clone(),
                question: entry.question.clone(),
                predicted: Predicted {
                    value: record.reading.value,
                    unit: record.reading.unit.clone(),
                    confidence: record.reading.confidence,
                },
                abs_error: record.abs_error,
                unit_consistent: record.unit_consistent,
                in_range: record.in_range,
                tick_aligned: record.tick_aligned,
                value_correct: record.value_correct,
                extractor: record.reading.extractor.clone(),
                failure: record.reading.failure.map(|f| f.as_str().to_string()),
                raw_rationale: record.reading.raw_rationale.clone(),
            })
            .collect();

        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            metrics: MetricsBlock {
                mae: report.mae,
                mse: report.mse,
                r2: report.r2,
                n_samples: report.n_samples,
                n_failed_parses: report.n_failed_parses,
                accuracy: report.accuracy,
            },
            results,
        }
    }

    /// Write the report as a JSON document.
    pub fn save(&self, path: &Path, pretty: bool) -> io::Result<()> {
        let mut writer = OutputWriter::new(
            BufWriter::new(File::create(path)?),
            OutputFormat::Json,
            pretty,
        );
        writer.write(self)?;
        writer.flush()
    }
}
