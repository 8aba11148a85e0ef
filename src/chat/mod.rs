pub mod emergency;
pub mod events;
pub mod library;
pub mod orchestrator;
pub mod relay_client;
pub mod session;
pub mod suggestions;

use thiserror::Error;

use crate::stream::StreamError;

pub use events::ChatEvent;
pub use orchestrator::{ChatOrchestrator, TurnOutcome};
pub use relay_client::{HttpRelay, RelayConfig, RelayTransport};

pub const STOPPED_MARKER: &str = "\n\n*[Response stopped by user]*";
pub const NEW_CONVERSATION_TITLE: &str = "New Conversation";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("relay rate limited the request")]
    RateLimited,

    #[error("relay reported the service unavailable")]
    ServiceUnavailable,

    #[error("relay error: {0}")]
    Relay(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("a response is already streaming for this conversation")]
    StreamInProgress,

    #[error("no active conversation")]
    NoConversation,

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("message is empty")]
    EmptyMessage,
}

impl ChatError {
    /// Text suitable for a user-facing toast.
    pub fn notice(&self) -> String {
        match self {
            ChatError::RateLimited => {
                "Rate limit exceeded. Please wait a moment and try again.".to_string()
            }
            ChatError::ServiceUnavailable => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            ChatError::Relay(msg) if !msg.is_empty() => msg.clone(),
            ChatError::Relay(_) | ChatError::Transport(_) => {
                "Failed to get response. Please try again.".to_string()
            }
            ChatError::Store(_) => "Failed to save message".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StreamError> for ChatError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Transport(msg) => ChatError::Transport(msg),
        }
    }
}
