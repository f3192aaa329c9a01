//! Dataset loading and validation.
//!
//! A dataset is a JSON array with one object per image. Field names from the
//! older export format (`image_path`, `image_type`, `question_id`) are
//! accepted as aliases, and a ground truth given only as an acceptance
//! interval uses the interval midpoint as its value.

use crate::error::DatasetError;
use crate::types::{GroundTruth, InstrumentMetadata, InstrumentType, ScaleHint};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One validated dataset entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetEntry {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub instrument_type: InstrumentType,
    pub ground_truth: GroundTruth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_hint: Option<ScaleHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl DatasetEntry {
    /// Instrument context handed to the inference engine.
    pub fn metadata(&self) -> InstrumentMetadata {
        InstrumentMetadata {
            instrument_type: self.instrument_type.clone(),
            scale_hint: self.scale_hint.clone(),
            question: self.question.clone(),
        }
    }

    /// Image location. Relative names resolve against `image_root`.
    pub fn image_path(&self, image_root: Option<&Path>) -> PathBuf {
        let name = Path::new(&self.file_name);
        match image_root {
            Some(root) if name.is_relative() => root.join(name),
            _ => name.to_path_buf(),
        }
    }
}

// --- Raw (on-disk) shape ---

#[derive(Deserialize)]
struct RawEntry {
    #[serde(alias = "image_path")]
    file_name: Option<String>,
    #[serde(default)]
    question_id: Option<serde_json::Value>,
    #[serde(alias = "image_type")]
    instrument_type: Option<String>,
    ground_truth: Option<RawGroundTruth>,
    #[serde(default)]
    scale_hint: Option<ScaleHint>,
    #[serde(default)]
    question: Option<String>,
}

#[derive(Deserialize)]
struct RawGroundTruth {
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    interval: Option<[f64; 2]>,
}

/// Load and validate a dataset file.
pub fn load_dataset(path: &Path) -> Result<Vec<DatasetEntry>, DatasetError> {
    let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_dataset(&content).map_err(|e| match e {
        ParseError::Json(source) => DatasetError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseError::Invalid(e) => e,
    })?;
    if entries.is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }

    tracing::info!("Loaded {} dataset entries from {:?}", entries.len(), path);
    Ok(entries)
}

enum ParseError {
    Json(serde_json::Error),
    Invalid(DatasetError),
}

fn parse_dataset(content: &str) -> Result<Vec<DatasetEntry>, ParseError> {
    let raw: Vec<RawEntry> = serde_json::from_str(content).map_err(ParseError::Json)?;
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());

    for (index, raw) in raw.into_iter().enumerate() {
        let entry = validate_entry(index, raw).map_err(ParseError::Invalid)?;
        if !seen.insert(entry.file_name.clone()) {
            return Err(ParseError::Invalid(DatasetError::Duplicate(entry.file_name)));
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Find one entry by question id, file name, or the file name's last path
/// component. Exact question id and file name matches take precedence.
pub fn find_entry<'a>(entries: &'a [DatasetEntry], key: &str) -> Option<&'a DatasetEntry> {
    let key = key.trim();
    entries
        .iter()
        .find(|e| e.question_id.as_deref() == Some(key) || e.file_name == key)
        .or_else(|| {
            entries.iter().find(|e| {
                Path::new(&e.file_name)
                    .file_name()
                    .is_some_and(|name| name == key)
            })
        })
}

fn validate_entry(index: usize, raw: RawEntry) -> Result<DatasetEntry, DatasetError> {
    let file_name = raw
        .file_name
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| DatasetError::InvalidEntry {
            file_name: format!("#{index}"),
            message: "missing file_name".into(),
        })?;
    let invalid = |message: String| DatasetError::InvalidEntry {
        file_name: file_name.clone(),
        message,
    };

    let instrument_type = raw
        .instrument_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| invalid("missing instrument_type".into()))?;

    let gt = raw
        .ground_truth
        .ok_or_else(|| invalid("missing ground_truth".into()))?;
    let unit = gt
        .unit
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| invalid("ground_truth.unit is empty".into()))?;

    let interval = match gt.interval {
        Some([lo, hi]) if !lo.is_finite() || !hi.is_finite() => {
            return Err(invalid("ground_truth.interval must be finite".into()));
        }
        Some([lo, hi]) if lo > hi => {
            return Err(invalid(format!(
                "ground_truth.interval [{lo}, {hi}] has min > max"
            )));
        }
        other => other,
    };
    let value = match (gt.value, interval) {
        (Some(v), _) if !v.is_finite() => {
            return Err(invalid("ground_truth.value must be finite".into()));
        }
        (Some(v), _) => v,
        (None, Some([lo, hi])) => (lo + hi) / 2.0,
        (None, None) => {
            return Err(invalid(
                "ground_truth needs a value or an interval".into(),
            ));
        }
    };

    if let Some(hint) = &raw.scale_hint {
        if let (Some(min), Some(max)) = (hint.min, hint.max) {
            if min > max {
                return Err(invalid(format!("scale_hint min {min} > max {max}")));
            }
        }
        if hint.minor_tick.is_some_and(|t| t <= 0.0) || hint.major_tick.is_some_and(|t| t <= 0.0) {
            return Err(invalid("scale_hint ticks must be positive".into()));
        }
    }

    let question_id = raw.question_id.and_then(|id| match id {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(DatasetEntry {
        file_name,
        question_id,
        instrument_type: InstrumentType::from(instrument_type),
        ground_truth: GroundTruth {
            value,
            unit,
            interval,
        },
        scale_hint: raw.scale_hint,
        question: raw.question.filter(|q| !q.trim().is_empty()),
    })
}
