//! Model completion surface.
//!
//! The loop controller only needs one capability: hand an ordered list of
//! role-tagged (possibly multimodal) messages to a model and get text back,
//! either as one complete response or as incremental deltas — the caller
//! picks the mode. [`OpenAiClient`] implements that against any
//! OpenAI-compatible `chat/completions` endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation, in OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// Either a bare string or a list of typed parts (text / image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Attach a PNG screenshot, wrapping raw base64 in a data URL unless the
    /// caller already supplied one.
    pub fn screenshot(base64_png: &str) -> Self {
        let url = if base64_png.starts_with("data:image") {
            base64_png.to_string()
        } else {
            format!("data:image/png;base64,{base64_png}")
        };
        Self::ImageUrl {
            image_url: ImageUrl { url },
        }
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Missing API key: set {0} or model.api_key in config")]
    MissingApiKey(String),

    #[error("Model request failed: {0}")]
    Http(String),

    #[error("Model endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Model response invalid: {0}")]
    InvalidResponse(String),

    #[error("Model stream failed: {0}")]
    Stream(String),
}

/// The capability the agent loop depends on. A timed-out or failed call
/// leaves no trace on the session — the step simply did not happen.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One complete textual response.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;

    /// Incremental text deltas, in order. The channel closes when the model
    /// finishes; a mid-stream failure is delivered as the final item.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, ModelError>>, ModelError>;
}

/// Drain a delta stream into the full response text.
pub async fn collect_stream(
    mut rx: mpsc::Receiver<Result<String, ModelError>>,
) -> Result<String, ModelError> {
    let mut full = String::new();
    while let Some(delta) = rx.recv().await {
        full.push_str(&delta?);
    }
    Ok(full)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Explicit key; when absent the env var named by `api_key_env` is read.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Ask for SSE deltas instead of one JSON body.
    #[serde(default)]
    pub stream: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            stream: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let api_key = match config.api_key.clone() {
            Some(key) if !key.is_empty() => key,
            _ => std::env::var(&config.api_key_env)
                .map_err(|_| ModelError::MissingApiKey(config.api_key_env.clone()))?,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            stream,
            messages,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(ModelError::Api { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let response = self.send(messages, false).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_text())
            .ok_or_else(|| ModelError::InvalidResponse("response missing content".into()))
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, ModelError>>, ModelError> {
        let response = self.send(messages, true).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ModelError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE frames are separated by a blank line.
                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);

                    for line in frame.lines() {
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let payload = payload.trim_start();
                        if payload == "[DONE]" {
                            return;
                        }
                        match extract_delta(payload) {
                            Some(delta) if !delta.is_empty() => {
                                if tx.send(Ok(delta)).await.is_err() {
                                    return;
                                }
                            }
                            Some(_) => {}
                            None => {
                                debug!("Skipping unparseable stream frame: {}", payload);
                            }
                        }
                    }
                }
            }
            if !buffer.trim().is_empty() {
                warn!("Model stream ended with unconsumed data");
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    stream: bool,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: ChatCompletionContent,
}

/// Providers return content either as a plain string or as typed parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(&self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value.clone()),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| part.text.as_ref())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                if text.is_empty() { None } else { Some(text) }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the text delta out of one SSE `data:` payload.
fn extract_delta(payload: &str) -> Option<String> {
    let chunk: StreamChunk = serde_json::from_str(payload).ok()?;
    Some(
        chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.clone())
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_to_openai_wire_shape() {
        let msg = ChatMessage::user_parts(vec![
            ContentPart::text("Observation"),
            ContentPart::screenshot("QUJD"),
        ]);
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );

        let system = serde_json::to_value(ChatMessage::system("be brief")).expect("serialize");
        assert_eq!(system["content"], "be brief");
    }

    #[test]
    fn screenshot_part_does_not_double_wrap_data_urls() {
        let part = ContentPart::screenshot("data:image/png;base64,QUJD");
        match part {
            ContentPart::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/png;base64,QUJD");
            }
            _ => panic!("expected image part"),
        }
    }

    #[test]
    fn response_content_tolerates_both_shapes() {
        let plain: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"Thought: x Action: Click [0]"}}]}"#,
        )
        .expect("parse");
        assert_eq!(
            plain.choices[0].message.content.as_text().as_deref(),
            Some("Thought: x Action: Click [0]")
        );

        let parts: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":[{"type":"text","text":"hello"}]}}]}"#,
        )
        .expect("parse");
        assert_eq!(
            parts.choices[0].message.content.as_text().as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn stream_deltas_are_extracted_from_sse_payloads() {
        assert_eq!(
            extract_delta(r#"{"choices":[{"delta":{"content":"par"}}]}"#).as_deref(),
            Some("par")
        );
        // Role-only opening chunk carries no text.
        assert_eq!(
            extract_delta(r#"{"choices":[{"delta":{}}]}"#).as_deref(),
            Some("")
        );
        assert!(extract_delta("not json").is_none());
    }

    #[test]
    fn request_body_carries_the_stream_flag() {
        let messages = vec![ChatMessage::system("sys")];
        let body = ChatCompletionRequest {
            model: "gpt-4o",
            temperature: 0.7,
            stream: true,
            messages: &messages,
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "system");
    }
}
