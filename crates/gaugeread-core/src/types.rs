//! Core data types shared by the inference and evaluation engines.
//!
//! These types describe what goes into a reading (image, instrument metadata),
//! what comes out of it (a `Reading`), and how a provider call ended
//! (`ProviderStatus`).

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Immutable handle to loaded image bytes.
///
/// Cloning is cheap: the bytes are shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Identifier used to join predictions back to dataset entries
    pub file_id: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
    bytes: Arc<[u8]>,
}

impl ImageRef {
    /// Wrap raw bytes, inferring the MIME type from a format or extension string.
    pub fn from_bytes(file_id: impl Into<String>, bytes: Vec<u8>, format: &str) -> Self {
        let media_type = match format.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            other => {
                tracing::warn!("Unknown image format '{other}', defaulting to image/jpeg");
                "image/jpeg"
            }
        };

        Self {
            file_id: file_id.into(),
            media_type: media_type.to_string(),
            bytes: Arc::from(bytes),
        }
    }

    /// Read an image from disk. The file extension decides the MIME type.
    pub async fn load(file_id: impl Into<String>, path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpeg")
            .to_string();
        Ok(Self::from_bytes(file_id, bytes, &format))
    }

    /// Raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base64 encoding of the image bytes.
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Return a data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }
}

/// Kind of measurement instrument shown in an image.
///
/// Known kinds get their own variant; anything else is kept verbatim in
/// `Other` so datasets with new instrument names still load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstrumentType {
    PressureGauge,
    Thermometer,
    Voltmeter,
    Ammeter,
    Multimeter,
    MeasuringCylinder,
    Ruler,
    Caliper,
    DigitalDisplay,
    Other(String),
}

impl InstrumentType {
    pub fn as_str(&self) -> &str {
        match self {
            InstrumentType::PressureGauge => "pressure_gauge",
            InstrumentType::Thermometer => "thermometer",
            InstrumentType::Voltmeter => "voltmeter",
            InstrumentType::Ammeter => "ammeter",
            InstrumentType::Multimeter => "multimeter",
            InstrumentType::MeasuringCylinder => "measuring_cylinder",
            InstrumentType::Ruler => "ruler",
            InstrumentType::Caliper => "caliper",
            InstrumentType::DigitalDisplay => "digital_display",
            InstrumentType::Other(name) => name,
        }
    }

    /// Whether the instrument has a physical scale with tick marks.
    pub fn is_analog(&self) -> bool {
        !self.as_str().contains("digital")
    }

    /// Human-readable name for prompts ("pressure gauge").
    pub fn display_name(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl From<String> for InstrumentType {
    fn from(value: String) -> Self {
        let key = value.trim().to_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "pressure_gauge" | "manometer" => InstrumentType::PressureGauge,
            "thermometer" => InstrumentType::Thermometer,
            "voltmeter" => InstrumentType::Voltmeter,
            "ammeter" => InstrumentType::Ammeter,
            "multimeter" => InstrumentType::Multimeter,
            "measuring_cylinder" | "graduated_cylinder" => InstrumentType::MeasuringCylinder,
            "ruler" => InstrumentType::Ruler,
            "caliper" | "vernier_caliper" => InstrumentType::Caliper,
            "digital_display" | "digital" => InstrumentType::DigitalDisplay,
            _ => InstrumentType::Other(key),
        }
    }
}

impl From<&str> for InstrumentType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<InstrumentType> for String {
    fn from(value: InstrumentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional description of the instrument's scale, supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_tick: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor_tick: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Caller-supplied context about the instrument in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    pub instrument_type: InstrumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_hint: Option<ScaleHint>,
    /// Free-text question to put to the model ("What is the reading of the ammeter?")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl InstrumentMetadata {
    pub fn new(instrument_type: impl Into<InstrumentType>) -> Self {
        Self {
            instrument_type: instrument_type.into(),
            scale_hint: None,
            question: None,
        }
    }

    pub fn with_scale_hint(mut self, hint: ScaleHint) -> Self {
        self.scale_hint = Some(hint);
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }
}

/// Externally supplied correct reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub value: f64,
    pub unit: String,
    /// Acceptance interval `[min, max]` for the value, if the dataset has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<[f64; 2]>,
}

impl GroundTruth {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
            interval: None,
        }
    }

    pub fn with_interval(mut self, min: f64, max: f64) -> Self {
        self.interval = Some([min, max]);
        self
    }
}

/// Why a reading has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The model answered but no extractor found a value
    ParseFailure,
    /// Every retry was spent on rate limits, auth or transient errors
    ExhaustedRetries,
    /// The provider returned an unusable payload
    FatalProvider,
    /// The batch was aborted before this image got a response
    Aborted,
    /// The image could not be read from disk
    IoError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ParseFailure => "parse_failure",
            FailureKind::ExhaustedRetries => "exhausted_retries",
            FailureKind::FatalProvider => "fatal_provider",
            FailureKind::Aborted => "aborted",
            FailureKind::IoError => "io_error",
        }
    }
}

/// Typed output of the inference engine for one image.
///
/// `value == None` marks a failed reading; such a reading never carries a
/// unit. Build readings through [`Reading::parsed`] and [`Reading::failed`] to
/// keep that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: Option<f64>,
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub raw_rationale: String,
    /// Parser layer that produced the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl Reading {
    /// A successfully parsed reading.
    ///
    /// Degrades to a parse failure if the unit is blank or the value is not
    /// finite.
    pub fn parsed(
        value: f64,
        unit: impl Into<String>,
        confidence: Option<f64>,
        raw_rationale: impl Into<String>,
        extractor: &str,
    ) -> Self {
        let unit = unit.into().trim().to_string();
        let raw_rationale = raw_rationale.into();
        if unit.is_empty() || !value.is_finite() {
            return Self::failed(FailureKind::ParseFailure, raw_rationale);
        }
        Self {
            value: Some(value),
            unit: Some(unit),
            confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            raw_rationale,
            extractor: Some(extractor.to_string()),
            failure: None,
        }
    }

    /// A reading without a value.
    pub fn failed(kind: FailureKind, raw_rationale: impl Into<String>) -> Self {
        Self {
            value: None,
            unit: None,
            confidence: None,
            raw_rationale: raw_rationale.into(),
            extractor: None,
            failure: Some(kind),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.value.is_none()
    }

    /// Re-establish the value/unit invariant on a reading that did not come
    /// through the constructors (e.g. deserialized from a predictions file).
    ///
    /// A value without a non-empty unit, or a non-finite value, becomes a
    /// parse failure. A failed reading loses any stray unit.
    pub fn validated(self) -> Self {
        match self.value {
            Some(value) => {
                let unit_ok = self.unit.as_deref().is_some_and(|u| !u.trim().is_empty());
                if unit_ok && value.is_finite() {
                    self
                } else {
                    Self::failed(FailureKind::ParseFailure, self.raw_rationale)
                }
            }
            None => Self {
                unit: None,
                extractor: None,
                failure: Some(self.failure.unwrap_or(FailureKind::ParseFailure)),
                ..self
            },
        }
    }
}

/// Outcome of a single provider call, as classified by a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Success,
    RateLimited,
    AuthError,
    TransientError,
    FatalError,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Success => "success",
            ProviderStatus::RateLimited => "rate_limited",
            ProviderStatus::AuthError => "auth_error",
            ProviderStatus::TransientError => "transient_error",
            ProviderStatus::FatalError => "fatal_error",
        }
    }

    /// Classify an HTTP status code.
    pub fn from_http(code: u16) -> Self {
        match code {
            200..=299 => ProviderStatus::Success,
            429 => ProviderStatus::RateLimited,
            401 | 403 => ProviderStatus::AuthError,
            408 | 500..=599 => ProviderStatus::TransientError,
            _ => ProviderStatus::FatalError,
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_from_bytes_png() {
        let image = ImageRef::from_bytes("a.png", vec![0x89, 0x50, 0x4E, 0x47], "PNG");
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.bytes().len(), 4);
    }

    #[test]
    fn test_image_ref_data_url() {
        let image = ImageRef::from_bytes("a.jpg", vec![1, 2, 3], "jpg");
        assert_eq!(image.data_url(), "data:image/jpeg;base64,AQID");
    }

    #[tokio::test]
    async fn test_image_ref_load_uses_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauge.webp");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let image = ImageRef::load("gauge", &path).await.unwrap();
        assert_eq!(image.file_id, "gauge");
        assert_eq!(image.media_type, "image/webp");
    }

    #[test]
    fn test_instrument_type_from_string() {
        assert_eq!(
            InstrumentType::from("Pressure Gauge"),
            InstrumentType::PressureGauge
        );
        assert_eq!(InstrumentType::from("ammeter"), InstrumentType::Ammeter);
        assert_eq!(
            InstrumentType::from("Hygrometer"),
            InstrumentType::Other("hygrometer".to_string())
        );
    }

    #[test]
    fn test_instrument_type_analog() {
        assert!(InstrumentType::PressureGauge.is_analog());
        assert!(InstrumentType::from("barometer").is_analog());
        assert!(!InstrumentType::DigitalDisplay.is_analog());
        assert!(!InstrumentType::from("digital_thermometer").is_analog());
    }

    #[test]
    fn test_instrument_type_serde_as_string() {
        let json = serde_json::to_string(&InstrumentType::MeasuringCylinder).unwrap();
        assert_eq!(json, "\"measuring_cylinder\"");
        let back: InstrumentType = serde_json::from_str("\"voltmeter\"").unwrap();
        assert_eq!(back, InstrumentType::Voltmeter);
    }

    #[test]
    fn test_reading_parsed_requires_unit() {
        let reading = Reading::parsed(12.0, "  ", None, "Answer: 12", "structured_tail");
        assert!(reading.is_failed());
        assert!(reading.unit.is_none());
        assert_eq!(reading.failure, Some(FailureKind::ParseFailure));
    }

    #[test]
    fn test_reading_parsed_rejects_nan() {
        let reading = Reading::parsed(f64::NAN, "psi", None, "", "structured_tail");
        assert!(reading.is_failed());
    }

    #[test]
    fn test_reading_zero_is_not_failure() {
        let reading = Reading::parsed(0.0, "bar", Some(1.4), "Answer: 0 bar", "structured_tail");
        assert!(!reading.is_failed());
        assert_eq!(reading.value, Some(0.0));
        assert_eq!(reading.confidence, Some(1.0));
    }

    #[test]
    fn test_validated_value_without_unit_fails() {
        let reading: Reading =
            serde_json::from_str(r#"{"value": 10.0, "unit": null, "raw_rationale": "10"}"#)
                .unwrap();
        let reading = reading.validated();
        assert!(reading.is_failed());
        assert_eq!(reading.failure, Some(FailureKind::ParseFailure));
        assert_eq!(reading.raw_rationale, "10");

        let blank: Reading =
            serde_json::from_str(r#"{"value": 3.0, "unit": " ", "raw_rationale": ""}"#).unwrap();
        assert!(blank.validated().is_failed());
    }

    #[test]
    fn test_validated_keeps_good_reading() {
        let reading = Reading::parsed(49.5, "psi", Some(0.8), "Answer: 49.5 psi", "structured_tail");
        assert_eq!(reading.clone().validated(), reading);

        let failed = Reading::failed(FailureKind::IoError, "[io_error]");
        assert_eq!(failed.clone().validated(), failed);
    }

    #[test]
    fn test_validated_drops_stray_unit() {
        let reading: Reading =
            serde_json::from_str(r#"{"value": null, "unit": "psi", "raw_rationale": "?"}"#)
                .unwrap();
        let reading = reading.validated();
        assert_eq!(reading.unit, None);
        assert_eq!(reading.failure, Some(FailureKind::ParseFailure));
    }

    #[test]
    fn test_provider_status_from_http() {
        assert_eq!(ProviderStatus::from_http(200), ProviderStatus::Success);
        assert_eq!(ProviderStatus::from_http(429), ProviderStatus::RateLimited);
        assert_eq!(ProviderStatus::from_http(401), ProviderStatus::AuthError);
        assert_eq!(ProviderStatus::from_http(403), ProviderStatus::AuthError);
        assert_eq!(ProviderStatus::from_http(503), ProviderStatus::TransientError);
        assert_eq!(ProviderStatus::from_http(400), ProviderStatus::FatalError);
    }
}
