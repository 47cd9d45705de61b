//! In-memory [`ConversationStore`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Conversation, ConversationStore, StoreError, Turn};
use crate::clock::{Clock, SystemClock};

/// Conversations kept in a DashMap for the life of the process.
#[derive(Clone)]
pub struct InMemoryConversationStore {
    conversations: Arc<DashMap<String, Conversation>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryConversationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            conversations: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.get(id).map(|c| c.value().clone()))
    }

    async fn create(&self, title: &str, model: &str) -> Result<Conversation, StoreError> {
        let now = self.clock.now();
        let conversation = Conversation {
            id: ulid::Ulid::new().to_string(),
            title: title.to_string(),
            model: model.to_string(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn append_turns(&self, id: &str, turns: Vec<Turn>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut conversation = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        conversation.turns.extend(turns);
        conversation.updated_at = now;
        Ok(())
    }
}
