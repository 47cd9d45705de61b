//! Tenant state engine: guild settings, per-user memory and rate limits.
//!
//! All state lives in [`KeyedStore`]s with per-key atomic updates. Nothing
//! here suspends, so callers may use it freely from async handlers.

mod guild;
mod memory;
mod rate_limit;
mod store;
mod sweep;

pub use guild::{
    DEFAULT_MODEL, DEFAULT_RATE_LIMIT_MAX, DIRECT_TENANT, GuildConfigStore, GuildSettings,
    GuildSettingsPatch, MAX_RATE_LIMIT_MAX, MIN_RATE_LIMIT_MAX, clamp_rate_limit,
};
pub use memory::{
    ConversationMemory, DEFAULT_CLEANUP_INTERVAL_SECONDS, DEFAULT_MAX_AGE_SECONDS,
    DEFAULT_MAX_HISTORY, MemoryEntry, MemoryLimits, UserConversation,
};
pub use rate_limit::{Admission, DEFAULT_WINDOW_SECONDS, RateLimitState, RateLimiter};
pub use store::{DashMapStore, KeyedStore};
pub use sweep::{SweepReport, run_sweep_once, spawn_sweep_task};
