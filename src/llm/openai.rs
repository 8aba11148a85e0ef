use super::{ChatRequest, ChatTurn, LlmError};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiErrorBody {
    error: Option<OpenAiErrorDetail>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OpenAiErrorDetail {
    Object { message: Option<String> },
    Text(String),
}

/// Starts a streamed chat completion and hands back the still-unread response.
pub async fn open_stream(
    client: &Client,
    config: &OpenAiConfig,
    request: &ChatRequest,
) -> Result<Response, LlmError> {
    if config.api_key.is_empty() {
        return Err(LlmError::NotConfigured("gateway key"));
    }

    let body = OpenAiRequest {
        model: &request.model,
        messages: &request.messages,
        stream: request.stream,
    };

    debug!(
        model = %request.model,
        messages = request.messages.len(),
        "opening upstream completion stream"
    );

    let resp = client
        .post(format!("{}/chat/completions", config.base_url))
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", config.api_key))
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
        StatusCode::PAYMENT_REQUIRED => Err(LlmError::PaymentRequired),
        _ => {
            let text = resp.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "AI gateway error");
            Err(LlmError::Api {
                status: status.as_u16(),
                message: error_message(&text).unwrap_or_default(),
            })
        }
    }
}

/// Pulls `error.message` (or a bare `error` string) out of an upstream error body.
pub fn error_message(body: &str) -> Option<String> {
    let parsed: OpenAiErrorBody = serde_json::from_str(body).ok()?;
    match parsed.error? {
        OpenAiErrorDetail::Object { message } => message,
        OpenAiErrorDetail::Text(text) => Some(text),
    }
    .filter(|m| !m.trim().is_empty())
}
