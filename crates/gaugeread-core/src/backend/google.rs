//! Google Gemini backend using the `generateContent` REST API.
//!
//! Sends the image as an inline base64 part next to the text prompt.

use super::{read_response, transport_failure, BackendRequest, ProviderResponse, VlmBackend};
use crate::types::ProviderStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Gemini backend.
pub struct GoogleBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleBackend {
    /// Create a backend for the given API base URL (".../v1beta").
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }
}

// --- Request types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

// --- Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn build_body(request: &BackendRequest) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![
                Part::Text {
                    text: request.prompt.clone(),
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: request.image.media_type.clone(),
                        data: request.image.base64(),
                    },
                },
            ],
        }],
        generation_config: GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
        },
    }
}

/// Gemini reports a bad key as HTTP 400 with reason `API_KEY_INVALID`.
fn classify(code: u16, body: &str) -> ProviderStatus {
    if code == 400 && body.contains("API_KEY_INVALID") {
        return ProviderStatus::AuthError;
    }
    ProviderStatus::from_http(code)
}

fn parse_body(body: &str) -> ProviderResponse {
    let resp: GenerateResponse = match serde_json::from_str(body) {
        Ok(resp) => resp,
        Err(e) => {
            return ProviderResponse::failure(
                ProviderStatus::FatalError,
                format!("Failed to parse Gemini response: {e}"),
            )
        }
    };

    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return ProviderResponse::failure(
            ProviderStatus::FatalError,
            format!("Gemini blocked the prompt: {reason}"),
        );
    }

    let Some(candidate) = resp.candidates.into_iter().next() else {
        return ProviderResponse::failure(
            ProviderStatus::FatalError,
            "Gemini returned no candidates",
        );
    };

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let text = text.trim();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return ProviderResponse::failure(
            ProviderStatus::FatalError,
            format!("Gemini returned no text (finish reason: {reason})"),
        );
    }
    ProviderResponse::success(text)
}

#[async_trait]
impl VlmBackend for GoogleBackend {
    fn name(&self) -> &str {
        "google"
    }

    async fn send(&self, request: &BackendRequest, api_key: &str) -> ProviderResponse {
        let start = Instant::now();
        let body = build_body(request);

        let resp = match self
            .client
            .post(self.url(&request.model))
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return transport_failure(self.name(), &e),
        };

        read_response(self.name(), resp, start, classify, parse_body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageRef;

    fn request() -> BackendRequest {
        BackendRequest {
            image: ImageRef::from_bytes("g.jpg", vec![1, 2, 3], "jpeg"),
            prompt: "Read the gauge".to_string(),
            model: "gemini-2.5-flash".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_url_includes_model() {
        let backend = GoogleBackend::new("https://example.test/v1beta/");
        assert_eq!(
            backend.url("gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_body_shape() {
        let json = serde_json::to_value(build_body(&request())).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Read the gauge");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_parse_success_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Step 1...\n"},{"text":"Answer: 50 psi"}]},"finishReason":"STOP"}]}"#;
        let resp = parse_body(body);
        assert_eq!(resp.status, ProviderStatus::Success);
        assert_eq!(resp.text, "Step 1...\nAnswer: 50 psi");
    }

    #[test]
    fn test_parse_blocked_prompt_is_fatal() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let resp = parse_body(body);
        assert_eq!(resp.status, ProviderStatus::FatalError);
        assert!(resp.text.contains("SAFETY"));
    }

    #[test]
    fn test_parse_empty_candidate_is_fatal() {
        let body = r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#;
        let resp = parse_body(body);
        assert_eq!(resp.status, ProviderStatus::FatalError);
        assert!(resp.text.contains("MAX_TOKENS"));
    }

    #[test]
    fn test_parse_malformed_json_is_fatal() {
        let resp = parse_body("{not json");
        assert_eq!(resp.status, ProviderStatus::FatalError);
    }

    #[test]
    fn test_classify_invalid_key_as_auth_error() {
        let body = r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
        assert_eq!(classify(400, body), ProviderStatus::AuthError);
        assert_eq!(classify(400, "{}"), ProviderStatus::FatalError);
        assert_eq!(classify(429, ""), ProviderStatus::RateLimited);
        assert_eq!(classify(503, ""), ProviderStatus::TransientError);
    }
}
