//! Evaluation engine: score readings against ground truth.
//!
//! [`Evaluator::evaluate`] is a pure function of its input. Every sample gets
//! an [`EvaluationRecord`] with independent consistency checks; readings with
//! a value feed the aggregate error metrics, failed readings are only
//! counted.

pub mod checks;
pub mod metrics;

pub use metrics::{error_metrics, ErrorMetrics};

use crate::config::Config;
use crate::dataset::DatasetEntry;
use crate::types::{FailureKind, GroundTruth, InstrumentType, Reading, ScaleHint};
use crate::units::UnitTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Pass,
    Fail,
    NotApplicable,
}

impl Check {
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Check::Pass
        } else {
            Check::Fail
        }
    }

    pub fn is_pass(self) -> bool {
        self == Check::Pass
    }
}

/// One ground truth paired with one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub file_id: String,
    pub instrument_type: InstrumentType,
    pub scale_hint: Option<ScaleHint>,
    pub ground_truth: GroundTruth,
    pub reading: Reading,
}

/// Scored sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub file_id: String,
    pub instrument_type: InstrumentType,
    pub ground_truth: GroundTruth,
    pub reading: Reading,
    pub abs_error: Option<f64>,
    pub unit_consistent: Check,
    pub in_range: Check,
    pub tick_aligned: Check,
    pub value_correct: Check,
}

/// Interval-based accuracy over samples whose ground truth has an interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub value_accuracy: f64,
    pub unit_accuracy: f64,
    pub overall_accuracy: f64,
    /// Samples the fractions are computed over
    pub n_scored: usize,
}

/// Aggregate result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub mae: Option<f64>,
    pub mse: Option<f64>,
    pub r2: Option<f64>,
    pub n_samples: usize,
    pub n_failed_parses: usize,
    pub accuracy: Option<Accuracy>,
    pub per_sample: Vec<EvaluationRecord>,
}

/// Scores samples with a fixed unit table and tick tolerance.
#[derive(Debug, Clone)]
pub struct Evaluator {
    units: UnitTable,
    tick_tolerance: f64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(UnitTable::default(), 0.5)
    }
}

impl Evaluator {
    /// `tick_tolerance` is a fraction of the minor tick.
    pub fn new(units: UnitTable, tick_tolerance: f64) -> Self {
        Self {
            units,
            tick_tolerance,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.unit_table(), config.evaluation.tick_tolerance)
    }

    /// Score a single sample.
    pub fn record(&self, sample: &Sample) -> EvaluationRecord {
        let hint = sample.scale_hint.as_ref();
        let gt = &sample.ground_truth;

        let (abs_error, unit_consistent, in_range, tick_aligned, value_correct) =
            match (sample.reading.value, sample.reading.unit.as_deref()) {
                (Some(value), Some(unit)) => (
                    Some((value - gt.value).abs()),
                    checks::unit_consistent(&self.units, unit, &gt.unit),
                    checks::in_range(value, hint),
                    checks::tick_aligned(
                        value,
                        &sample.instrument_type,
                        hint,
                        self.tick_tolerance,
                    ),
                    checks::value_correct(value, gt.interval),
                ),
                _ => (
                    None,
                    Check::NotApplicable,
                    Check::NotApplicable,
                    Check::NotApplicable,
                    Check::NotApplicable,
                ),
            };

        EvaluationRecord {
            file_id: sample.file_id.clone(),
            instrument_type: sample.instrument_type.clone(),
            ground_truth: gt.clone(),
            reading: sample.reading.clone(),
            abs_error,
            unit_consistent,
            in_range,
            tick_aligned,
            value_correct,
        }
    }

    /// Score all samples and aggregate.
    pub fn evaluate(&self, samples: &[Sample]) -> Report {
        let per_sample: Vec<EvaluationRecord> = samples.iter().map(|s| self.record(s)).collect();

        // Only records that were scored (value and unit present) feed the metrics
        let pairs: Vec<(f64, f64)> = per_sample
            .iter()
            .filter(|r| r.abs_error.is_some())
            .filter_map(|r| r.reading.value.map(|v| (v, r.ground_truth.value)))
            .collect();
        let n_failed_parses = per_sample.len() - pairs.len();
        let metrics = error_metrics(&pairs);

        tracing::debug!(
            "Evaluated {} samples ({} failed)",
            per_sample.len(),
            n_failed_parses
        );

        Report {
            mae: metrics.mae,
            mse: metrics.mse,
            r2: metrics.r2,
            n_samples: per_sample.len(),
            n_failed_parses,
            accuracy: accuracy(&per_sample),
            per_sample,
        }
    }
}

fn accuracy(records: &[EvaluationRecord]) -> Option<Accuracy> {
    let scored: Vec<&EvaluationRecord> = records
        .iter()
        .filter(|r| r.ground_truth.interval.is_some())
        .collect();
    let total = scored.len();

    let value_ok = scored.iter().filter(|r| r.value_correct.is_pass()).count();
    let unit_ok = scored.iter().filter(|r| r.unit_consistent.is_pass()).count();
    let both_ok = scored
        .iter()
        .filter(|r| r.value_correct.is_pass() && r.unit_consistent.is_pass())
        .count();

    Some(Accuracy {
        value_accuracy: metrics::fraction(value_ok, total)?,
        unit_accuracy: metrics::fraction(unit_ok, total)?,
        overall_accuracy: metrics::fraction(both_ok, total)?,
        n_scored: total,
    })
}

/// Pair dataset entries with predictions by file name.
///
/// Entries without a prediction get a failed reading marked as aborted.
pub fn join(entries: &[DatasetEntry], predictions: &BTreeMap<String, Reading>) -> Vec<Sample> {
    entries
        .iter()
        .map(|entry| {
            let reading = predictions.get(&entry.file_name).cloned().unwrap_or_else(|| {
                Reading::failed(FailureKind::Aborted, "[aborted: no prediction]")
            });
            Sample {
                file_id: entry.file_name.clone(),
                instrument_type: entry.instrument_type.clone(),
                scale_hint: entry.scale_hint.clone(),
                ground_truth: entry.ground_truth.clone(),
                reading,
            }
        })
        .collect()
}
