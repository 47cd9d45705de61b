//! Per-message orchestration for gateways and the HTTP endpoint.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentFetcher, AttachmentRef, MAX_ATTACHMENT_SIZE, prepare_message};
use crate::clock::Clock;
use crate::llm::{Message, Role};
use crate::relay::{RelayError, RelayEvent, RelayReply, RelayRequest, StreamRelay};
use crate::tenant::{
    ConversationMemory, DIRECT_TENANT, GuildConfigStore, MemoryEntry, RateLimiter,
};

/// Chat command that clears the sender's memory.
pub const RESET_COMMAND: &str = "!reset";

/// Name of the file carrying an oversized reply.
pub const REPLY_FILE_NAME: &str = "response.txt";

const EVENT_BUFFER: usize = 32;

/// A message from a chat platform.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Guild the message was posted in. `None` for direct messages.
    pub guild_id: Option<String>,
    pub user_id: String,
    /// Platform-level administrator flag.
    pub is_admin: bool,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
}

impl IncomingMessage {
    fn tenant_key(&self) -> &str {
        self.guild_id.as_deref().unwrap_or(DIRECT_TENANT)
    }
}

/// What to post back to the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub file: Option<ReplyFile>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFile {
    pub name: String,
    pub content: String,
}

/// A streaming request from the HTTP endpoint.
#[derive(Debug, Clone)]
pub struct StreamChat {
    pub user_id: String,
    pub message: String,
    /// Overrides the direct tenant's current model.
    pub model: Option<String>,
    pub conversation_id: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

/// Denied by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("You're sending messages too quickly. Try again in {retry_after_seconds}s.")]
pub struct RateLimited {
    pub retry_after_seconds: u64,
}

/// Dispatcher knobs that are not owned by a component.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Users that bypass rate limiting on every platform.
    pub admin_user_ids: HashSet<String>,
    pub max_attachment_bytes: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            admin_user_ids: HashSet::new(),
            max_attachment_bytes: MAX_ATTACHMENT_SIZE,
        }
    }
}

/// Routes inbound messages through policy, attachments and the relay.
#[derive(Clone)]
pub struct Dispatcher {
    relay: StreamRelay,
    limiter: RateLimiter,
    memory: ConversationMemory,
    guilds: GuildConfigStore,
    fetcher: Arc<dyn AttachmentFetcher>,
    clock: Arc<dyn Clock>,
    policy: Arc<DispatchPolicy>,
}

impl Dispatcher {
    pub fn new(
        relay: StreamRelay,
        limiter: RateLimiter,
        memory: ConversationMemory,
        guilds: GuildConfigStore,
        fetcher: Arc<dyn AttachmentFetcher>,
        clock: Arc<dyn Clock>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            relay,
            limiter,
            memory,
            guilds,
            fetcher,
            clock,
            policy: Arc::new(policy),
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn guilds(&self) -> &GuildConfigStore {
        &self.guilds
    }

    pub fn relay(&self) -> &StreamRelay {
        &self.relay
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Answer one chat platform message. Always produces a reply.
    pub async fn handle_incoming(&self, message: IncomingMessage) -> Reply {
        if message.text.trim() == RESET_COMMAND {
            return self.reset_history(&message.user_id);
        }

        let tenant = message.tenant_key();
        if let Err(limited) = self.check_rate(tenant, &message.user_id, message.is_admin) {
            info!(user_id = %message.user_id, tenant, "Rate limited");
            return Reply::text(limited.to_string());
        }

        let settings = self.guilds.get(tenant);
        let context = self.memory.record(
            &message.user_id,
            Role::User,
            message.text.as_str(),
            self.clock.now(),
        );
        let prior_messages = if settings.memory_share_enabled {
            history(&context)
        } else {
            Vec::new()
        };

        let prepared = prepare_message(
            self.fetcher.as_ref(),
            &message.text,
            &message.attachments,
            self.policy.max_attachment_bytes,
        )
        .await;

        debug!(
            user_id = %message.user_id,
            tenant,
            model = %settings.current_model,
            history = prior_messages.len(),
            attachments = prepared.outcomes.len(),
            "Dispatching message"
        );

        let request = RelayRequest {
            prior_messages,
            content: prepared.content,
            user_text: message.text.clone(),
            model: settings.current_model,
            conversation_id: None,
        };

        match self.relay.complete(request).await {
            Ok(reply) => {
                self.memory.append(
                    &message.user_id,
                    Role::Assistant,
                    reply.text.as_str(),
                    self.clock.now(),
                );
                self.format_reply(reply)
            }
            Err(e) => Reply::text(failure_message(&e)),
        }
    }

    /// Forget everything remembered for `user_id`.
    pub fn reset_history(&self, user_id: &str) -> Reply {
        if self.memory.clear(user_id) {
            info!(user_id, "Conversation history cleared");
            Reply::text("Your conversation history has been cleared.")
        } else {
            Reply::text("There was no conversation history to clear.")
        }
    }

    /// Admit one request from `user_id` under `tenant`'s limit.
    ///
    /// Admins are never counted.
    pub fn check_rate(
        &self,
        tenant: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<(), RateLimited> {
        if is_admin || self.policy.admin_user_ids.contains(user_id) {
            return Ok(());
        }
        let limit = self.guilds.get(tenant).rate_limit_max;
        let admission = self.limiter.admit(user_id, self.clock.now(), limit);
        if admission.allowed {
            Ok(())
        } else {
            Err(RateLimited {
                retry_after_seconds: admission.retry_after_seconds,
            })
        }
    }

    /// Start a streamed reply for the HTTP endpoint.
    ///
    /// Rate limiting happens here, before any event is produced. The relay
    /// runs on its own task and stops when the receiver is dropped.
    pub fn stream_http(&self, chat: StreamChat) -> Result<mpsc::Receiver<RelayEvent>, RateLimited> {
        let StreamChat {
            user_id,
            message,
            model,
            conversation_id,
            attachments,
        } = chat;
        self.check_rate(DIRECT_TENANT, &user_id, false)?;

        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.guilds.get(DIRECT_TENANT).current_model);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let prior_messages = match &conversation_id {
                Some(id) => dispatcher.stored_history(id).await,
                None => Vec::new(),
            };
            let prepared = prepare_message(
                dispatcher.fetcher.as_ref(),
                &message,
                &attachments,
                dispatcher.policy.max_attachment_bytes,
            )
            .await;

            let request = RelayRequest {
                prior_messages,
                content: prepared.content,
                user_text: message,
                model,
                conversation_id,
            };
            // Failures already reached the client as an error event.
            let _ = dispatcher.relay.stream(request, tx).await;
        });
        Ok(rx)
    }

    /// The most recent turns of a stored conversation, bounded by the memory cap.
    async fn stored_history(&self, conversation_id: &str) -> Vec<Message> {
        let conversation = match self.relay.conversations().get(conversation_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(conversation_id, error = %e, "Failed to load conversation history");
                return Vec::new();
            }
        };
        let skip = conversation
            .turns
            .len()
            .saturating_sub(self.memory.limits().max_history);
        conversation
            .turns
            .into_iter()
            .skip(skip)
            .map(|turn| Message::text(turn.role, turn.content))
            .collect()
    }

    fn format_reply(&self, reply: RelayReply) -> Reply {
        let limit = self.relay.config().reply_char_limit;
        if reply.full_text.chars().count() <= limit {
            return Reply::text(reply.text);
        }

        let content = if reply.text.chars().count() <= limit {
            reply.text
        } else {
            truncate_with_ellipsis(&reply.text, limit)
        };
        Reply {
            content,
            file: Some(ReplyFile {
                name: REPLY_FILE_NAME.to_string(),
                content: reply.full_text,
            }),
        }
    }
}

/// Remembered entries as prior messages, or nothing when there is at most
/// one entry.
fn history(context: &[MemoryEntry]) -> Vec<Message> {
    if context.len() > 1 {
        context.iter().map(MemoryEntry::to_message).collect()
    } else {
        Vec::new()
    }
}

/// Cut `text` to at most `limit` characters, ending in `…` when cut.
pub fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn failure_message(error: &RelayError) -> String {
    match error {
        RelayError::EmptyResponse => "No response produced. Try rephrasing your message.".to_string(),
        RelayError::IdleTimeout => {
            "The model took too long to respond. Please try again.".to_string()
        }
        RelayError::UpstreamRejected(_) => {
            "The model couldn't answer that right now. Please try again later.".to_string()
        }
        _ => "Something went wrong while generating a reply. Please try again.".to_string(),
    }
}
