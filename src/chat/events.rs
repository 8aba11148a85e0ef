use serde::Serialize;

use crate::db::models::Message;

/// A turn that emits `Typing` ends with exactly one of `Completed`, `Stopped`
/// or `Failed`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Typing {
        conversation_id: String,
    },
    Delta {
        conversation_id: String,
        delta: String,
        /// Accumulated text so far.
        text: String,
    },
    Completed {
        conversation_id: String,
        message: Message,
        emergency: bool,
        suggestions: Vec<String>,
    },
    Stopped {
        conversation_id: String,
        message: Option<Message>,
    },
    Failed {
        conversation_id: String,
        notice: String,
    },
    Notice {
        notice: String,
    },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::Completed { .. } | ChatEvent::Stopped { .. } | ChatEvent::Failed { .. }
        )
    }
}
