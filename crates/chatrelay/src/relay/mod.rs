//! The streaming relay: one upstream completion per inbound request.
//!
//! ```text
//!  Init ──► UpstreamRequested ──► Streaming ──► Completed
//!   │              │                  │
//!   └──────────────┴──────────────────┴───────► Failed
//! ```
//!
//! A relay call persists at most one append of `[user turn, assistant turn]`
//! and only after the upstream finished with non-empty text. Every failure
//! leaves the conversation untouched, so callers can always retry.

mod event;
mod stream;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use thiserror::Error;

pub use event::RelayEvent;
pub use stream::StreamRelay;

use crate::conversation::StoreError;
use crate::llm::{Message, MessageContent};

/// Default reply ceiling in characters, matching the smallest chat surface.
pub const DEFAULT_REPLY_CHAR_LIMIT: usize = 2000;

/// Default maximum wait between two upstream frames.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 60;

/// Client-facing message for a completion that produced no text.
pub const NO_RESPONSE_MESSAGE: &str = "No response produced";

/// Instruction for the secondary summarization call. `{limit}` is replaced
/// with the character ceiling.
pub const DEFAULT_SUMMARY_PROMPT: &str = "Rewrite the following reply so it fits in {limit} \
characters. Keep the key points, any code, and the original language. Answer with the \
shortened reply only.";

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub reply_char_limit: usize,
    pub idle_timeout: Duration,
    pub summary_prompt: String,
    /// Optional system prompt placed before the prior messages.
    pub system_prompt: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reply_char_limit: DEFAULT_REPLY_CHAR_LIMIT,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECONDS),
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            system_prompt: None,
        }
    }
}

/// Input of one relay call.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Earlier turns sent before the new message.
    pub prior_messages: Vec<Message>,
    /// The new user message as sent upstream.
    pub content: MessageContent,
    /// The typed text, recorded as the user turn.
    pub user_text: String,
    pub model: String,
    /// Existing conversation to append to. A new one is created when absent.
    pub conversation_id: Option<String>,
}

/// Result of a successful streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub conversation_id: String,
    pub text: String,
}

/// Result of a successful single-shot call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReply {
    /// Text to deliver and remember: the summary when one was produced.
    pub text: String,
    /// Everything the upstream produced.
    pub full_text: String,
    pub summarized: bool,
}

/// Why a relay call ended without a recorded turn.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The provider refused the request or reported an in-band error.
    #[error("{0}")]
    UpstreamRejected(String),

    /// The upstream connection broke mid-stream.
    #[error("upstream connection interrupted: {0}")]
    TransportInterrupted(String),

    /// The client went away before the reply finished.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("upstream idle timeout")]
    IdleTimeout,

    #[error("{NO_RESPONSE_MESSAGE}")]
    EmptyResponse,

    #[error(transparent)]
    Store(#[from] StoreError),
}
