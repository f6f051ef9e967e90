//! Generation client abstraction used for transcription and knowledge extraction.
//!
//! The pipeline talks to the model through [`GenerationClient`]. The bundled
//! [`MessagesClient`] speaks a Messages-style HTTP API: one user turn made of content blocks
//! (a base64 PDF document and/or text), answered by a list of content blocks whose first text
//! block is the result.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

const API_VERSION: &str = "2023-06-01";

/// Errors surfaced while calling the generation provider.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider could not be reached or the client could not be built.
    #[error("Generation provider unavailable: {0}")]
    Unavailable(String),
    /// Provider answered with a non-success status.
    #[error("Generation failed ({status}): {body}")]
    Failed {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body of the failing response.
        body: String,
    },
    /// Provider response could not be interpreted.
    #[error("Malformed generation response: {0}")]
    InvalidResponse(String),
}

/// One block of the user turn sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    /// Binary document (e.g. a PDF) sent inline.
    Document {
        /// Media type of the document.
        media_type: String,
        /// Raw document bytes.
        data: Vec<u8>,
    },
    /// Plain text.
    Text(String),
}

/// Request passed to a generation client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Content blocks forming the single user turn.
    pub content: Vec<ContentBlock>,
    /// Maximum number of output tokens.
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Request made of a document followed by an instruction.
    pub fn document(media_type: &str, data: Vec<u8>, prompt: &str, max_tokens: u32) -> Self {
        Self {
            content: vec![
                ContentBlock::Document {
                    media_type: media_type.to_string(),
                    data,
                },
                ContentBlock::Text(prompt.to_string()),
            ],
            max_tokens,
        }
    }

    /// Request made of a single text block.
    pub fn text(text: String, max_tokens: u32) -> Self {
        Self {
            content: vec![ContentBlock::Text(text)],
            max_tokens,
        }
    }
}

/// Interface implemented by generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate text for the request and return the first text block of the answer.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

/// Messages-style HTTP generation client.
pub struct MessagesClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl MessagesClient {
    /// Build a client with the given connect and read timeouts.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("doctoknow/generation")
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|error| GenerationError::Unavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn payload(&self, request: &GenerationRequest) -> Value {
        let content: Vec<Value> = request
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Document { media_type, data } => json!({
                    "type": "document",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": STANDARD.encode(data),
                    }
                }),
                ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
            })
            .collect();

        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": content }],
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl GenerationClient for MessagesClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let payload = self.payload(&request);
        let mut builder = self
            .http
            .post(self.endpoint())
            .header("anthropic-version", API_VERSION)
            .json(&payload);
        if let Some(api_key) = self.api_key.as_deref() {
            builder = builder.header("x-api-key", api_key);
        }

        let response = builder.send().await.map_err(|error| {
            GenerationError::Unavailable(format!(
                "failed to reach generation provider at {}: {error}",
                self.base_url
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, "Generation request failed");
            return Err(GenerationError::Failed { status, body });
        }

        let body: MessagesResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;

        body.content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| GenerationError::InvalidResponse("response has no text block".into()))
    }
}
