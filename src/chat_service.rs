//! Chat completion client for OpenAI-compatible APIs (Groq by default).

use crate::config::ChatConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 400;
const TOP_P: f32 = 0.9;

#[derive(Error, Debug)]
pub enum ChatServiceError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
    #[error("Request to chat service failed: {0}")]
    Transport(String),
    #[error("Chat service returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Malformed chat service response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl ChatCompletionRequest {
    /// One system turn and one user turn with the service's fixed sampling.
    pub fn new(model: &str, system_prompt: String, user_message: String) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: system_prompt,
                },
                ChatMessage {
                    role: Role::User,
                    content: user_message,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            top_p: TOP_P,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    fn into_reply(self) -> Result<String, ChatServiceError> {
        self.choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatServiceError::MalformedResponse("response has no choices".into()))?
            .message
            .content
            .ok_or_else(|| {
                ChatServiceError::MalformedResponse("first choice has no message content".into())
            })
    }
}

#[async_trait]
pub trait ChatService: Send + Sync + 'static {
    fn model(&self) -> &str;

    async fn complete(&self, request: ChatCompletionRequest) -> Result<String, ChatServiceError>;
}

pub struct CompletionClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Secret<String>,
}

impl CompletionClient {
    pub fn new(config: &ChatConfig) -> Result<Self, ChatServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatServiceError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatService for CompletionClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatCompletionRequest) -> Result<String, ChatServiceError> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatServiceError::MalformedResponse(e.to_string()))?;

        completion.into_reply()
    }
}
