use serde::{Deserialize, Serialize};

use crate::model::RagMetadata;

/// Summary of one streaming chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StreamTrace {
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,

    /// Id of the assistant message the deltas were appended to.
    pub message_id: Option<String>,

    /// Frames, deltas and raw body bytes seen by the parser.
    pub frames: u64,
    pub deltas: u64,
    pub bytes: u64,

    /// "done", "ended", "cancelled" or "failed".
    pub outcome: Option<String>,

    /// Wall time from request start to the end of the stream.
    pub latency_ms: Option<u64>,

    pub rag_used: Option<bool>,
    pub rag_docs_count: Option<u32>,

    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl StreamTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }
    pub fn conversation(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }
    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }
    pub fn counts(mut self, frames: u64, deltas: u64, bytes: u64) -> Self {
        self.frames = frames;
        self.deltas = deltas;
        self.bytes = bytes;
        self
    }
    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn rag_opt(mut self, meta: Option<RagMetadata>) -> Self {
        self.rag_used = meta.map(|m| m.rag_used);
        self.rag_docs_count = meta.map(|m| m.rag_docs_count);
        self
    }
    pub fn error_opt(mut self, err: Option<&crate::error::ChatStreamError>) -> Self {
        self.error_kind = err.map(|e| e.kind().to_string());
        self.error_message = err.map(|e| e.to_string());
        self
    }
}
