//! Per-user bounded conversation memory with time-based eviction.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::store::{DashMapStore, KeyedStore};
use crate::llm::{Message, Role};

/// Default number of entries kept per user.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Default idle age after which a user's memory is evicted (2 hours).
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 2 * 60 * 60;

/// Default sweep period (30 minutes).
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 30 * 60;

/// One remembered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: String,
}

impl MemoryEntry {
    pub fn to_message(&self) -> Message {
        Message::text(self.role.clone(), self.content.clone())
    }
}

/// A user's remembered conversation.
#[derive(Debug, Clone)]
pub struct UserConversation {
    pub entries: VecDeque<MemoryEntry>,
    pub last_updated: DateTime<Utc>,
}

/// Limits applied by [`ConversationMemory`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    pub max_history: usize,
    pub max_age: TimeDelta,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            max_age: TimeDelta::seconds(DEFAULT_MAX_AGE_SECONDS),
        }
    }
}

/// Bounded FIFO memory per user key.
#[derive(Clone)]
pub struct ConversationMemory {
    store: Arc<dyn KeyedStore<UserConversation>>,
    limits: MemoryLimits,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn KeyedStore<UserConversation>>, limits: MemoryLimits) -> Self {
        Self { store, limits }
    }

    pub fn in_memory(limits: MemoryLimits) -> Self {
        Self::new(Arc::new(DashMapStore::new()), limits)
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    /// Push an entry, dropping the oldest ones beyond the cap.
    pub fn append(&self, key: &str, role: Role, content: impl Into<String>, now: DateTime<Utc>) {
        self.record(key, role, content, now);
    }

    /// Push an entry and return what was remembered before it, in one update.
    pub fn record(
        &self,
        key: &str,
        role: Role,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Vec<MemoryEntry> {
        let max_history = self.limits.max_history.max(1);
        let mut pending = Some(MemoryEntry {
            role,
            content: content.into(),
        });
        let mut prior = Vec::new();

        let fresh = || UserConversation {
            entries: VecDeque::with_capacity(max_history),
            last_updated: now,
        };
        self.store.update(key, &fresh, &mut |conversation| {
            if let Some(entry) = pending.take() {
                prior = conversation.entries.iter().cloned().collect();
                conversation.entries.push_back(entry);
            }
            while conversation.entries.len() > max_history {
                conversation.entries.pop_front();
            }
            conversation.last_updated = now;
        });
        prior
    }

    /// The remembered entries, oldest first. Empty if the user is unknown.
    pub fn get_context(&self, key: &str) -> Vec<MemoryEntry> {
        self.store
            .get(key)
            .map(|conversation| conversation.entries.into_iter().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn last_updated(&self, key: &str) -> Option<DateTime<Utc>> {
        self.store.get(key).map(|c| c.last_updated)
    }

    /// Forget everything remembered for `key`.
    pub fn clear(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    /// Evict every key idle for longer than the max age. Returns the count evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let max_age = self.limits.max_age;
        let mut evicted = 0;
        self.store.retain(&mut |_, conversation| {
            let keep = now - conversation.last_updated <= max_age;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }
}
