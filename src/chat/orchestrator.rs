use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use super::emergency;
use super::events::ChatEvent;
use super::library::Library;
use super::relay_client::RelayTransport;
use super::session::{SessionRegistry, StreamSession};
use super::suggestions;
use super::{ChatError, NEW_CONVERSATION_TITLE, STOPPED_MARKER};
use crate::db::models::{truncate_chars, Conversation, Message};
use crate::db::ChatStore;
use crate::llm::{ChatTurn, Role};
use crate::relay::RelayRequest;
use crate::stream::{read_stream, ReadOutcome};

const TITLE_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed { message: Message, emergency: bool },
    Stopped(Option<Message>),
}

/// Drives chat turns for one chat surface: general chat, or one library.
pub struct ChatOrchestrator {
    relay: Arc<dyn RelayTransport>,
    store: Arc<dyn ChatStore>,
    user_id: Option<String>,
    library: Option<&'static Library>,
    active: Mutex<Option<String>>,
    sessions: SessionRegistry,
    events: UnboundedSender<ChatEvent>,
}

impl ChatOrchestrator {
    pub fn new(
        relay: Arc<dyn RelayTransport>,
        store: Arc<dyn ChatStore>,
        user_id: Option<String>,
    ) -> (Self, UnboundedReceiver<ChatEvent>) {
        Self::build(relay, store, user_id, None)
    }

    pub fn for_library(
        relay: Arc<dyn RelayTransport>,
        store: Arc<dyn ChatStore>,
        user_id: Option<String>,
        library: &'static Library,
    ) -> (Self, UnboundedReceiver<ChatEvent>) {
        Self::build(relay, store, user_id, Some(library))
    }

    fn build(
        relay: Arc<dyn RelayTransport>,
        store: Arc<dyn ChatStore>,
        user_id: Option<String>,
        library: Option<&'static Library>,
    ) -> (Self, UnboundedReceiver<ChatEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            relay,
            store,
            user_id,
            library,
            active: Mutex::new(None),
            sessions: SessionRegistry::new(),
            events,
        };
        (orchestrator, rx)
    }

    pub fn library(&self) -> Option<&'static Library> {
        self.library
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.active().clone()
    }

    pub fn new_conversation(&self) -> Result<Conversation, ChatError> {
        let conversation = self.store.create_conversation(
            self.user_id.as_deref(),
            NEW_CONVERSATION_TITLE,
            self.library_id(),
        )?;
        *self.active() = Some(conversation.id.clone());
        Ok(conversation)
    }

    pub fn select_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .get_conversation(id)?
            .ok_or(ChatError::NoConversation)?;
        if conversation.library_id.as_deref() != self.library_id() {
            return Err(ChatError::InvalidState(
                "conversation belongs to another chat surface",
            ));
        }
        *self.active() = Some(conversation.id.clone());
        Ok(conversation)
    }

    pub fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        Ok(self
            .store
            .list_conversations(self.user_id.as_deref(), self.library_id())?)
    }

    pub fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>, ChatError> {
        let needle = query.trim().to_lowercase();
        let all = self.list_conversations()?;
        if needle.is_empty() {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.last_message_preview.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidState("title must not be empty"));
        }
        self.store.rename_conversation(id, title)?;
        Ok(())
    }

    pub fn delete_conversation(&self, id: &str) -> Result<(), ChatError> {
        if self.sessions.cancel(id) {
            debug!(conversation_id = %id, "cancelled stream of deleted conversation");
        }
        self.store.delete_conversation(id)?;
        let mut active = self.active();
        if active.as_deref() == Some(id) {
            *active = None;
        }
        Ok(())
    }

    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        Ok(self.store.get_messages(conversation_id)?)
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.sessions.is_active(conversation_id)
    }

    pub fn stop(&self) -> bool {
        match self.active_conversation() {
            Some(id) => self.stop_conversation(&id),
            None => false,
        }
    }

    pub fn stop_conversation(&self, conversation_id: &str) -> bool {
        self.sessions.cancel(conversation_id)
    }

    pub async fn send_message(&self, content: &str) -> Result<TurnOutcome, ChatError> {
        let text = content.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let conversation_id = self.ensure_conversation(text)?;
        let session = self.sessions.begin(&conversation_id)?;
        let history = to_turns(&self.store.get_messages(&conversation_id)?);
        self.submit(session, history, text).await
    }

    pub async fn regenerate(&self) -> Result<TurnOutcome, ChatError> {
        let conversation_id = self.active_conversation().ok_or(ChatError::NoConversation)?;
        let session = self.sessions.begin(&conversation_id)?;

        let mut messages = self.store.get_messages(&conversation_id)?;
        let (Some(reply), Some(prompt)) = (messages.pop(), messages.pop()) else {
            return Err(ChatError::InvalidState("nothing to regenerate"));
        };
        if reply.role != Role::Assistant || prompt.role != Role::User {
            return Err(ChatError::InvalidState(
                "regenerate needs a user message followed by an assistant reply",
            ));
        }

        self.store.delete_message(&reply.id)?;
        debug!(conversation_id = %conversation_id, removed = %reply.id, "regenerating reply");

        let pre_check = emergency::mentions_emergency(&prompt.content);
        self.run_turn(session, to_turns(&messages), prompt.content, pre_check)
            .await
    }

    /// Only the most recent user message can be edited.
    pub async fn edit_and_resubmit(
        &self,
        message_id: &str,
        content: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let text = content.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let conversation_id = self.active_conversation().ok_or(ChatError::NoConversation)?;
        let session = self.sessions.begin(&conversation_id)?;

        let messages = self.store.get_messages(&conversation_id)?;
        let last_user = messages.iter().rposition(|m| m.role == Role::User);
        let Some(idx) = last_user.filter(|&i| messages[i].id == message_id) else {
            return Err(ChatError::InvalidState(
                "only the most recent user message can be edited",
            ));
        };

        let removed = self.store.delete_messages_from(&conversation_id, message_id)?;
        debug!(conversation_id = %conversation_id, removed, "editing last user message");

        self.submit(session, to_turns(&messages[..idx]), text).await
    }

    async fn submit(
        &self,
        session: StreamSession,
        history: Vec<ChatTurn>,
        text: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let conversation_id = session.conversation_id().to_string();
        if let Err(e) = self
            .store
            .add_message(&conversation_id, Role::User, text, false)
        {
            return Err(self.persistence_failed(e));
        }
        if history.is_empty() {
            self.retitle_if_default(&conversation_id, text);
        }

        let pre_check = emergency::mentions_emergency(text);
        if pre_check {
            info!(conversation_id = %conversation_id, "emergency keywords in user message");
        }
        self.run_turn(session, history, text.to_string(), pre_check)
            .await
    }

    async fn run_turn(
        &self,
        mut session: StreamSession,
        history: Vec<ChatTurn>,
        text: String,
        pre_check: bool,
    ) -> Result<TurnOutcome, ChatError> {
        let conversation_id = session.conversation_id().to_string();
        self.emit(ChatEvent::Typing {
            conversation_id: conversation_id.clone(),
        });

        let request = self.relay_request(history, text);
        let streamed = self.stream_reply(&mut session, &request).await;
        let outcome = match streamed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "turn failed");
                drop(session);
                self.emit(ChatEvent::Failed {
                    conversation_id,
                    notice: e.notice(),
                });
                return Err(e);
            }
        };

        match outcome {
            ReadOutcome::Completed => {
                let reply = session.text().to_string();
                let emergency = emergency::classify(pre_check, &reply);
                let saved =
                    self.store
                        .add_message(&conversation_id, Role::Assistant, &reply, emergency);
                drop(session);
                let message = match saved {
                    Ok(message) => message,
                    Err(e) => return Err(self.turn_persistence_failed(conversation_id, e)),
                };
                debug!(conversation_id = %conversation_id, emergency, "turn completed");
                self.emit(ChatEvent::Completed {
                    conversation_id,
                    suggestions: suggestions::extract(&message.content).suggestions,
                    message: message.clone(),
                    emergency,
                });
                Ok(TurnOutcome::Completed { message, emergency })
            }
            ReadOutcome::Cancelled => {
                let saved = self.save_partial(&conversation_id, session.text());
                drop(session);
                let message = match saved {
                    Ok(message) => message,
                    Err(e) => return Err(self.turn_persistence_failed(conversation_id, e)),
                };
                debug!(
                    conversation_id = %conversation_id,
                    saved = message.is_some(),
                    "turn stopped"
                );
                self.emit(ChatEvent::Stopped {
                    conversation_id,
                    message: message.clone(),
                });
                Ok(TurnOutcome::Stopped(message))
            }
        }
    }

    async fn stream_reply(
        &self,
        session: &mut StreamSession,
        request: &RelayRequest,
    ) -> Result<ReadOutcome, ChatError> {
        let cancel = session.token().clone();
        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ReadOutcome::Cancelled),
            opened = self.relay.open(request) => opened?,
        };

        let conversation_id = session.conversation_id().to_string();
        let events = &self.events;
        let outcome = read_stream(
            transport,
            |delta| {
                let text = session.push(delta).to_string();
                let _ = events.send(ChatEvent::Delta {
                    conversation_id: conversation_id.clone(),
                    delta: delta.to_string(),
                    text,
                });
            },
            || debug!(conversation_id = %conversation_id, "stream finished"),
            &cancel,
        )
        .await?;
        Ok(outcome)
    }

    fn save_partial(
        &self,
        conversation_id: &str,
        partial: &str,
    ) -> Result<Option<Message>, rusqlite::Error> {
        if partial.trim().is_empty() || self.store.get_conversation(conversation_id)?.is_none() {
            return Ok(None);
        }
        let content = format!("{partial}{STOPPED_MARKER}");
        self.store
            .add_message(conversation_id, Role::Assistant, &content, false)
            .map(Some)
    }

    fn relay_request(&self, history: Vec<ChatTurn>, text: String) -> RelayRequest {
        RelayRequest {
            messages: vec![ChatTurn::user(text)],
            conversation_history: history,
            system_prompt: self.library.map(|lib| lib.system_prompt.to_string()),
            user_id: self.user_id.clone(),
            library_id: self.library.map(|lib| lib.id.to_string()),
        }
    }

    fn ensure_conversation(&self, text: &str) -> Result<String, ChatError> {
        let mut active = self.active();
        if let Some(id) = active.as_ref() {
            return Ok(id.clone());
        }
        let conversation = self.store.create_conversation(
            self.user_id.as_deref(),
            &truncate_chars(text, TITLE_CHARS),
            self.library_id(),
        )?;
        debug!(conversation_id = %conversation.id, "created conversation");
        *active = Some(conversation.id.clone());
        Ok(conversation.id)
    }

    fn retitle_if_default(&self, conversation_id: &str, text: &str) {
        let result = self.store.get_conversation(conversation_id).and_then(|c| {
            match c {
                Some(c) if c.title == NEW_CONVERSATION_TITLE => self
                    .store
                    .rename_conversation(conversation_id, &truncate_chars(text, TITLE_CHARS)),
                _ => Ok(()),
            }
        });
        if let Err(e) = result {
            warn!(conversation_id = %conversation_id, error = %e, "failed to retitle conversation");
            self.emit(ChatEvent::Notice {
                notice: "Failed to update conversation title".to_string(),
            });
        }
    }

    fn persistence_failed(&self, e: rusqlite::Error) -> ChatError {
        error!(error = %e, "failed to save message");
        let err = ChatError::Store(e);
        self.emit(ChatEvent::Notice {
            notice: err.notice(),
        });
        err
    }

    fn turn_persistence_failed(&self, conversation_id: String, e: rusqlite::Error) -> ChatError {
        error!(conversation_id = %conversation_id, error = %e, "failed to save reply");
        let err = ChatError::Store(e);
        self.emit(ChatEvent::Failed {
            conversation_id,
            notice: err.notice(),
        });
        err
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn active(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn library_id(&self) -> Option<&'static str> {
        self.library.map(|lib| lib.id)
    }
}

fn to_turns(messages: &[Message]) -> Vec<ChatTurn> {
    messages
        .iter()
        .map(|m| ChatTurn::new(m.role, m.content.clone()))
        .collect()
}
