/// Span/Log attribute keys for streaming calls.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_AGENT_ID: &str = "chat.agent_id";
pub const KEY_CONVERSATION_ID: &str = "chat.conversation_id";
pub const KEY_MESSAGE_ID: &str = "chat.message_id";

pub const KEY_FRAMES: &str = "sse.frames";
pub const KEY_DELTAS: &str = "sse.deltas";
pub const KEY_BYTES: &str = "sse.bytes";
pub const KEY_OUTCOME: &str = "sse.outcome";

pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_RAG_USED: &str = "rag.used";
pub const KEY_RAG_DOCS: &str = "rag.docs_count";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
