use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Retrieval-augmentation flags carried by the `done` frame.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct RagMetadata {
    #[serde(default)]
    pub rag_used: bool,
    #[serde(default)]
    pub rag_docs_count: u32,
}

/// Body of the streaming request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub content: String,
}

/// One message of a conversation as held by the client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag: Option<RagMetadata>,
}

impl MessageRecord {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            is_streaming: false,
            rag: None,
        }
    }

    /// Empty assistant message that deltas will be appended to.
    pub fn streaming_assistant() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = MessageRecord::new(Role::Assistant, "ok");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"assistant\""));
        assert!(!json.contains("rag"));
    }

    #[test]
    fn rag_metadata_from_done_payload() {
        let meta: RagMetadata =
            serde_json::from_str(r#"{"rag_used": true, "rag_docs_count": 3}"#).unwrap();
        assert_eq!(
            meta,
            RagMetadata {
                rag_used: true,
                rag_docs_count: 3
            }
        );
    }

    #[test]
    fn streaming_assistant_starts_empty() {
        let a = MessageRecord::streaming_assistant();
        let b = MessageRecord::streaming_assistant();
        assert!(a.is_streaming);
        assert_eq!(a.content, "");
        assert_eq!(a.role, Role::Assistant);
        assert_ne!(a.id, b.id);
        assert!(chrono::DateTime::parse_from_rfc3339(&a.timestamp).is_ok());
    }
}
