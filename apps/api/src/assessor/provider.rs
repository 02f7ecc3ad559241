//! Vision provider adapters — the single point of contact with external
//! image-understanding APIs.
//!
//! Each provider implements the same narrow contract: image bytes plus a
//! natural-language instruction in, text out. Latency and failure modes are
//! untrusted; the HTTP client carries a bounded timeout and any error simply
//! moves the chain in `assessor::DamageAssessor` to the next provider.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::models::ImageUpload;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";

const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider returned empty content")]
    EmptyContent,
}

/// Opaque external image-understanding capability.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends one image plus an instruction and returns the model's raw text.
    async fn describe(&self, image: &ImageUpload, instruction: &str)
        -> Result<String, ProviderError>;
}

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .expect("Failed to build HTTP client")
}

fn encode_image(image: &ImageUpload) -> String {
    base64::engine::general_purpose::STANDARD.encode(&image.bytes)
}

/// Extracts an error message from a provider error body, falling back to the
/// raw body when it is not the expected JSON shape.
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAI chat-completions vision
// ────────────────────────────────────────────────────────────────────────────

pub struct OpenAiVision {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

impl OpenAiVision {
    pub fn new(api_key: String, timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
            api_key,
        }
    }
}

#[async_trait]
impl VisionProvider for OpenAiVision {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn describe(
        &self,
        image: &ImageUpload,
        instruction: &str,
    ) -> Result<String, ProviderError> {
        let data_url = format!("data:{};base64,{}", image.media_type(), encode_image(image));
        let body = json!({
            "model": OPENAI_MODEL,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        });

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let parsed: OpenAiResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyContent);
        }
        debug!(provider = "openai", chars = text.len(), "vision call succeeded");
        Ok(text)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Anthropic messages vision
// ────────────────────────────────────────────────────────────────────────────

pub struct AnthropicVision {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicVision {
    pub fn new(api_key: String, timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
            api_key,
        }
    }
}

#[async_trait]
impl VisionProvider for AnthropicVision {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn describe(
        &self,
        image: &ImageUpload,
        instruction: &str,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": ANTHROPIC_MODEL,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type(),
                            "data": encode_image(image),
                        },
                    },
                    { "type": "text", "text": instruction },
                ],
            }],
        });

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let parsed: AnthropicResponse = response.json().await?;
        let text = parsed
            .content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyContent);
        }
        debug!(
            provider = "anthropic",
            chars = text.len(),
            "vision call succeeded"
        );
        Ok(text)
    }
}
