//! Chatrelay - A streaming chat relay with per-tenant policy for web clients and chat bots.

pub mod attachment;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod gateway;
pub mod handlers;
pub mod llm;
pub mod relay;
pub mod response;
pub mod server;
pub mod tenant;
