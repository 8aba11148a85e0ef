use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use tracing::warn;

use super::ChatError;
use crate::llm::openai::error_message;
use crate::relay::RelayRequest;
use crate::stream::{ByteStream, StreamError};

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn open(&self, request: &RelayRequest) -> Result<ByteStream, ChatError>;
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub client_key: Option<String>,
}

pub struct HttpRelay {
    client: Client,
    config: RelayConfig,
}

impl HttpRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn open(&self, request: &RelayRequest) -> Result<ByteStream, ChatError> {
        let mut builder = self.client.post(&self.config.url).json(request);
        if let Some(key) = &self.config.client_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "relay call rejected");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited,
                StatusCode::PAYMENT_REQUIRED => ChatError::ServiceUnavailable,
                _ => ChatError::Relay(error_message(&body).unwrap_or_default()),
            });
        }

        Ok(response.bytes_stream().map_err(StreamError::from).boxed())
    }
}
