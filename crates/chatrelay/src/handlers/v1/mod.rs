//! V1 API handlers.

mod admin;
mod auth;
mod chat;
mod conversations;
mod memory;

pub use admin::{get_guild, list_guilds, patch_guild, reset_rate_limit};
pub use chat::stream_chat;
pub use conversations::get_conversation;
pub use memory::clear_memory;

/// Header naming the caller of the web endpoints.
pub const USER_ID_HEADER: &str = "x-user-id";

/// User key when the caller does not identify itself.
pub const ANONYMOUS_USER: &str = "anonymous";
