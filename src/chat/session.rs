use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::ChatError;

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, conversation_id: &str) -> Result<StreamSession, ChatError> {
        let mut active = self.lock();
        if active.contains_key(conversation_id) {
            return Err(ChatError::StreamInProgress);
        }
        let cancel = CancellationToken::new();
        active.insert(conversation_id.to_string(), cancel.clone());
        Ok(StreamSession {
            conversation_id: conversation_id.to_string(),
            cancel,
            accumulated: String::new(),
            registry: self.clone(),
        })
    }

    /// Requests cancellation; returns `false` if nothing was streaming.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.lock().get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.lock().contains_key(conversation_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dropping the session deregisters it.
#[derive(Debug)]
pub struct StreamSession {
    conversation_id: String,
    cancel: CancellationToken,
    accumulated: String,
    registry: SessionRegistry,
}

impl StreamSession {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Appends a delta and returns the accumulated text.
    pub fn push(&mut self, delta: &str) -> &str {
        self.accumulated.push_str(delta);
        &self.accumulated
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.conversation_id);
    }
}
