//! Client-side state of one chat conversation.
//!
//! Mutations are plain methods on an owned value; whoever drives a turn holds
//! `&mut Conversation` for its duration.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ChatStreamError, CoreResult};
use crate::model::{MessageRecord, RagMetadata, Role};

/// Handle of an in-flight assistant reply.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_message_id: String,
    /// Id of the streaming assistant message deltas are appended to.
    pub message_id: String,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<MessageRecord>,
    is_streaming: bool,
    current_streaming_id: Option<String>,
    error: Option<String>,
    active: Option<CancellationToken>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn current_streaming_id(&self) -> Option<&str> {
        self.current_streaming_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn add_message(&mut self, message: MessageRecord) {
        self.messages.push(message);
    }

    /// Replace the history, e.g. after loading it from the backend.
    pub fn set_messages(&mut self, messages: Vec<MessageRecord>) {
        self.messages = messages;
        self.is_streaming = false;
        self.current_streaming_id = None;
        self.error = None;
    }

    /// Append `chunk` to message `id`. Unknown ids are ignored.
    pub fn append_to_streaming(&mut self, id: &str, chunk: &str) -> Option<&MessageRecord> {
        let msg = self.messages.iter_mut().find(|m| m.id == id)?;
        msg.content.push_str(chunk);
        Some(msg)
    }

    pub fn finalize_streaming(&mut self, id: &str) {
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
            msg.is_streaming = false;
        }
        self.is_streaming = false;
        self.current_streaming_id = None;
        self.active = None;
    }

    /// Attach retrieval metadata. Ignored unless `rag_used`.
    pub fn set_rag_metadata(&mut self, id: &str, meta: RagMetadata) {
        if !meta.rag_used {
            return;
        }
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
            msg.rag = Some(meta);
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.is_streaming = false;
        self.current_streaming_id = None;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Drop all messages and cancel the active turn, if any.
    pub fn clear(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
        self.messages.clear();
        self.is_streaming = false;
        self.current_streaming_id = None;
        self.error = None;
    }

    /// Start a turn: record the user's message and an empty streaming reply.
    pub fn begin_turn(&mut self, user_text: &str) -> CoreResult<Turn> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(ChatStreamError::Validation("message is empty".into()));
        }
        if self.is_streaming {
            return Err(ChatStreamError::Validation(
                "a reply is already streaming".into(),
            ));
        }

        let user = MessageRecord::new(Role::User, text);
        let user_message_id = user.id.clone();
        self.add_message(user);
        self.clear_error();

        let reply = MessageRecord::streaming_assistant();
        let message_id = reply.id.clone();
        self.add_message(reply);
        self.is_streaming = true;
        self.current_streaming_id = Some(message_id.clone());

        if let Some(prev) = self.active.take() {
            prev.cancel();
        }
        let cancel = CancellationToken::new();
        self.active = Some(cancel.clone());
        debug!(message_id = %message_id, "turn started");

        Ok(Turn {
            user_message_id,
            message_id,
            cancel,
        })
    }

    /// Abort the active turn and finalize its message with whatever arrived.
    pub fn cancel_streaming(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
        }
        if let Some(id) = self.current_streaming_id.clone() {
            self.finalize_streaming(&id);
        }
        self.is_streaming = false;
    }
}
