use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::llm::LlmError;

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again in a moment.";
pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable. Please try again later.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to get AI response";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing or invalid client key")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("{0}")]
    Failed(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RelayError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorised".to_owned()),
            RelayError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE.to_owned())
            }
            RelayError::ServiceUnavailable => {
                (StatusCode::PAYMENT_REQUIRED, UNAVAILABLE_MESSAGE.to_owned())
            }
            RelayError::Failed(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<LlmError> for RelayError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::RateLimited => RelayError::RateLimited,
            LlmError::PaymentRequired => RelayError::ServiceUnavailable,
            LlmError::Api { message, .. } if !message.is_empty() => RelayError::Failed(message),
            LlmError::Api { .. } => RelayError::Failed(GENERIC_FAILURE_MESSAGE.to_owned()),
            LlmError::NotConfigured(what) => {
                RelayError::Failed(format!("{what} is not configured"))
            }
            LlmError::Http(e) => {
                error!(error = %e, "AI gateway unreachable");
                RelayError::Failed(GENERIC_FAILURE_MESSAGE.to_owned())
            }
        }
    }
}
