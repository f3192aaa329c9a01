//! OpenAI backend using the Chat Completions API.
//!
//! Sends the image as a data URL in the user message content array. Works
//! with any server that speaks the same protocol.

use super::{read_response, transport_failure, BackendRequest, ProviderResponse, VlmBackend};
use crate::types::ProviderStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// OpenAI-style backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenAiBackend {
    /// Create a backend posting to the given Chat Completions URL.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

// --- Request types ---

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ChatContent>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ChatContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn build_body(request: &BackendRequest) -> ChatRequest {
    ChatRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: vec![
                ChatContent::Text {
                    text: request.prompt.clone(),
                },
                ChatContent::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image.data_url(),
                    },
                },
            ],
        }],
    }
}

fn classify(code: u16, _body: &str) -> ProviderStatus {
    ProviderStatus::from_http(code)
}

fn parse_body(body: &str) -> ProviderResponse {
    let chat_resp: ChatResponse = match serde_json::from_str(body) {
        Ok(resp) => resp,
        Err(e) => {
            return ProviderResponse::failure(
                ProviderStatus::FatalError,
                format!("Failed to parse OpenAI response: {e}"),
            )
        }
    };

    match chat_resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
    {
        Some(text) if !text.is_empty() => ProviderResponse::success(text),
        _ => ProviderResponse::failure(
            ProviderStatus::FatalError,
            "OpenAI returned no content in choices",
        ),
    }
}

#[async_trait]
impl VlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, request: &BackendRequest, api_key: &str) -> ProviderResponse {
        let start = Instant::now();
        let body = build_body(request);

        let resp = match self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
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
            image: ImageRef::from_bytes("g.png", vec![1, 2, 3], "png"),
            prompt: "Read the gauge".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 300,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_body_shape() {
        let json = serde_json::to_value(build_body(&request())).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 300);
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Read the gauge");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AQID");
    }

    #[test]
    fn test_parse_success() {
        let body = r#"{"choices":[{"message":{"content":"  Answer: 4.4 A \n"}}],"model":"gpt-4o"}"#;
        let resp = parse_body(body);
        assert_eq!(resp.status, ProviderStatus::Success);
        assert_eq!(resp.text, "Answer: 4.4 A");
    }

    #[test]
    fn test_parse_empty_choices_is_fatal() {
        let resp = parse_body(r#"{"choices":[]}"#);
        assert_eq!(resp.status, ProviderStatus::FatalError);
    }

    #[test]
    fn test_parse_null_content_is_fatal() {
        let resp = parse_body(r#"{"choices":[{"message":{"content":null}}]}"#);
        assert_eq!(resp.status, ProviderStatus::FatalError);
    }

    #[test]
    fn test_parse_garbage_is_fatal() {
        let resp = parse_body("<html>gateway</html>");
        assert_eq!(resp.status, ProviderStatus::FatalError);
        assert!(resp.text.contains("Failed to parse"));
    }

    #[test]
    fn test_classify_http_codes() {
        assert_eq!(classify(429, ""), ProviderStatus::RateLimited);
        assert_eq!(classify(401, ""), ProviderStatus::AuthError);
        assert_eq!(classify(502, ""), ProviderStatus::TransientError);
        assert_eq!(classify(400, ""), ProviderStatus::FatalError);
    }
}
