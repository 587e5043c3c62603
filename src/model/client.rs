//! Decision client for an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use super::prompt::Prompt;
use crate::actions::{parse_action, Action, ActionParseError};
use crate::settings::Settings;

/// Sampling temperature in normal mode.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Sampling temperature in advanced mode.
pub const ADVANCED_TEMPERATURE: f32 = 0.7;

/// Default bound on a single completion request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Decision client errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Transport(e.to_string())
    }
}

impl From<ActionParseError> for ModelError {
    fn from(e: ActionParseError) -> Self {
        ModelError::MalformedResponse(e.to_string())
    }
}

/// Per-request model configuration, taken from the task's settings snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub temperature: f32,
    /// Execution speed 1-5; drives the pre-call pacing delay.
    pub execution_speed: u8,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            temperature: DEFAULT_TEMPERATURE,
            execution_speed: 3,
        }
    }
}

impl ModelConfig {
    /// Build from engine settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model_name: settings.model_name.clone(),
            temperature: if settings.advanced_mode {
                ADVANCED_TEMPERATURE
            } else {
                DEFAULT_TEMPERATURE
            },
            execution_speed: settings.speed(),
        }
    }

    /// Create a new ModelConfig with custom base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Create a new ModelConfig with custom API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Create a new ModelConfig with custom model name.
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_execution_speed(mut self, speed: u8) -> Self {
        self.execution_speed = speed;
        self
    }

    /// Delay before each call: `max(200ms, 1500ms - speed * 250ms)`.
    pub fn pacing_delay(&self) -> Duration {
        let ms = 1500i64 - i64::from(self.execution_speed) * 250;
        Duration::from_millis(ms.max(200) as u64)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Something that picks the next action for a prompt.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(&self, config: &ModelConfig, prompt: &Prompt) -> Result<Action, ModelError>;
}

/// OpenAI API response structures.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct ModelClient {
    client: Client,
    request_timeout: Duration,
}

impl ModelClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Build the JSON body of a completion request.
    pub fn build_request_body(config: &ModelConfig, prompt: &Prompt) -> Value {
        json!({
            "model": config.model_name,
            "messages": [
                MessageBuilder::create_system_message(&prompt.system),
                MessageBuilder::create_user_message(&prompt.user),
            ],
            "temperature": config.temperature,
            "response_format": { "type": "json_object" },
        })
    }

    /// Extract and validate the action from a raw completion body.
    pub fn parse_completion(body: &str) -> Result<Action, ModelError> {
        let completion: ChatCompletionResponse = serde_json::from_str(body)
            .map_err(|e| ModelError::MalformedResponse(format!("Invalid completion: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::MalformedResponse("No choices in response".to_string()))?;

        Ok(parse_action(&content)?)
    }
}

impl Default for ModelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionMaker for ModelClient {
    async fn decide(&self, config: &ModelConfig, prompt: &Prompt) -> Result<Action, ModelError> {
        sleep(config.pacing_delay()).await;

        let body = Self::build_request_body(config, prompt);
        tracing::debug!("Requesting decision from {}", config.model_name);

        let response = self
            .client
            .post(config.completions_url())
            .bearer_auth(&config.api_key)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Transport(format!("{}: {}", status, text)));
        }

        Self::parse_completion(&text)
    }
}

/// Helper for building conversation messages.
pub struct MessageBuilder;

impl MessageBuilder {
    /// Create a system message.
    pub fn create_system_message(content: &str) -> Value {
        json!({
            "role": "system",
            "content": content
        })
    }

    /// Create a plain-text user message.
    pub fn create_user_message(text: &str) -> Value {
        json!({
            "role": "user",
            "content": text
        })
    }
}
