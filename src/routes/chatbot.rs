use crate::{
    chat_service::{ChatCompletionRequest, ChatServiceError},
    prompt::{build_system_prompt, ChatContext},
    routes::ErrorBody,
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/chatbot/";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    context: Option<ChatContext>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    reply: String,
}

#[derive(Error, Debug)]
pub enum ChatbotError {
    #[error("Empty message")]
    EmptyMessage,
    #[error("Invalid request body")]
    InvalidBody(String),
    #[error("Failed to generate response")]
    Remote(#[from] ChatServiceError),
}

impl ChatbotError {
    fn status(&self) -> StatusCode {
        match self {
            ChatbotError::Remote(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ChatbotError::Remote(_) => "remote_service",
            _ => "validation",
        }
    }
}

impl IntoResponse for ChatbotError {
    fn into_response(self) -> Response {
        let detail = match &self {
            ChatbotError::EmptyMessage => None,
            ChatbotError::InvalidBody(detail) => Some(detail.clone()),
            ChatbotError::Remote(err) => Some(err.to_string()),
        };
        let body = ErrorBody {
            error: self.to_string(),
            detail,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn chatbot(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ChatbotError> {
    state.metrics.record_request(ROUTE);

    let result = reply_to(&state, payload).await;
    if let Err(err) = &result {
        state.metrics.record_error(ROUTE, err.kind());
        match err {
            ChatbotError::Remote(cause) => tracing::error!("Chat completion failed: {}", cause),
            other => tracing::warn!("Rejected chat request: {}", other),
        }
    }

    result.map(|reply| Json(ChatReply { reply }))
}

async fn reply_to(
    state: &SharedState,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<String, ChatbotError> {
    let Json(request) = payload.map_err(|e| ChatbotError::InvalidBody(e.body_text()))?;

    let message = request.message.as_deref().unwrap_or_default().trim();
    if message.is_empty() {
        return Err(ChatbotError::EmptyMessage);
    }

    let system_prompt = build_system_prompt(request.context.as_ref());
    let completion = ChatCompletionRequest::new(
        state.chat_service.model(),
        system_prompt,
        message.to_string(),
    );

    let start = Instant::now();
    let reply = state.chat_service.complete(completion).await?;
    state
        .metrics
        .record_chat_duration(start.elapsed().as_millis() as u64, ROUTE);

    Ok(reply)
}
