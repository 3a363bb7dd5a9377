//! Language-model fallback for phrasings the rules do not cover.
//!
//! The model is untrusted: its answer is parsed defensively and any failure
//! surfaces as a [`ModelError`] that the classifier turns into an unknown
//! intent.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gemma2-9b-it";
pub const AUTH_ENV_VAR: &str = "WARDEN_MODEL_API_KEY";
pub const LEGACY_AUTH_ENV_VAR: &str = "GROQ_API_KEY";
const DEFAULT_MAX_TOKENS: u32 = 256;

/// Model-call errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend is not configured: {0}")]
    NotConfigured(String),

    #[error("model transport failed: {0}")]
    Transport(String),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed model response: {0}")]
    Malformed(String),
}

/// What the model is asked to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIntent {
    /// `install` or `not_install`.
    pub intent: String,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ModelIntent {
    /// Parse the JSON object out of a free-form completion.
    ///
    /// Models like to wrap JSON in prose or code fences; everything outside
    /// the outermost braces is ignored.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let start = raw
            .find('{')
            .ok_or_else(|| ModelError::Malformed("no JSON object in completion".to_string()))?;
        let end = raw
            .rfind('}')
            .filter(|&end| end > start)
            .ok_or_else(|| ModelError::Malformed("unterminated JSON object".to_string()))?;

        serde_json::from_str(&raw[start..=end]).map_err(|e| ModelError::Malformed(e.to_string()))
    }
}

/// Structured free-text classification service.
#[async_trait]
pub trait IntentModel: Send + Sync {
    fn name(&self) -> &str;

    async fn classify_free_text(&self, text: &str) -> Result<ModelIntent, ModelError>;
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat-completions backend (Groq, OpenAI, local servers).
#[derive(Clone)]
pub struct ChatCompletionsModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl std::fmt::Debug for ChatCompletionsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsModel")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatCompletionsModel {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::NotConfigured("empty API key".to_string()));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            temperature: 0.1,
        })
    }

    /// Read the API key from `WARDEN_MODEL_API_KEY`, then `GROQ_API_KEY`.
    pub fn api_key_from_env() -> Result<String, ModelError> {
        std::env::var(AUTH_ENV_VAR)
            .or_else(|_| std::env::var(LEGACY_AUTH_ENV_VAR))
            .map_err(|_| {
                ModelError::NotConfigured(format!(
                    "missing {} (or {})",
                    AUTH_ENV_VAR, LEGACY_AUTH_ENV_VAR
                ))
            })
    }

    fn prompt(text: &str) -> String {
        format!(
            "Decide whether the message below asks for a software package to be installed.\n\
             Installing, setting up, adding, downloading or getting a library or tool all count.\n\
             Questions about a package do not.\n\n\
             Message: {text:?}\n\n\
             Answer with a single JSON object and nothing else:\n\
             {{\"intent\": \"install\" | \"not_install\", \"package_name\": string | null, \"version\": string | null}}"
        )
    }
}

#[async_trait]
impl IntentModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify_free_text(&self, text: &str) -> Result<ModelIntent, ModelError> {
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": [
                {"role": "user", "content": Self::prompt(text)},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status,
                body: truncate(&body, 320),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ModelError::Malformed("response has no choices".to_string()))?;

        let text = match content {
            Value::String(text) => text,
            other => other.to_string(),
        };
        ModelIntent::parse(&text)
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let mut cut = value.chars().take(max).collect::<String>();
        cut.push('…');
        cut
    }
}
