//! Client-facing relay events.

use serde_json::json;

/// One event forwarded to a streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Always first. Lets a client that reconnects find its conversation.
    ConversationId(String),
    /// A text delta.
    Content(String),
    /// Terminal failure. At most one per call.
    Error(String),
    /// Terminal success.
    Done,
}

impl RelayEvent {
    /// The `data:` payload of the SSE frame for this event.
    pub fn sse_data(&self) -> String {
        match self {
            RelayEvent::ConversationId(id) => json!({ "conversationId": id }).to_string(),
            RelayEvent::Content(content) => json!({ "content": content }).to_string(),
            RelayEvent::Error(message) => json!({ "error": message }).to_string(),
            RelayEvent::Done => "[DONE]".to_string(),
        }
    }
}
