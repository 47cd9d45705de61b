//! Conversation records owned outside the relay core.
//!
//! The relay only needs three operations: look a conversation up, create one,
//! and append a batch of turns. [`InMemoryConversationStore`] is the
//! implementation used by the server. Durable storage is out of scope.

mod memory_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use memory_store::InMemoryConversationStore;

use crate::llm::Role;

/// Longest title derived from a first message, in characters.
pub const TITLE_MAX_CHARS: usize = 50;

/// Title used when the first message has no text.
pub const DEFAULT_TITLE: &str = "New chat";

/// A stored conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Errors from a [`ConversationStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("conversation store failure: {0}")]
    Backend(String),
}

/// Storage for conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    async fn create(&self, title: &str, model: &str) -> Result<Conversation, StoreError>;

    /// Append all `turns` or none of them.
    async fn append_turns(&self, id: &str, turns: Vec<Turn>) -> Result<(), StoreError>;
}

/// Derive a conversation title from the first user message.
pub fn title_from_message(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut chars = trimmed.chars();
    let title: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", title.trim_end())
    } else {
        title
    }
}
