//! Gateway protocol types for Chatrelay.
//!
//! Gateways adapt a chat platform (Discord, ...) to the relay core. They
//! exchange two message types with the core over channels:
//!
//! - [`GatewayEvent`]: platform to core (message received, reset requested, ...)
//! - [`GatewayCommand`]: core to platform (send a reply, show typing, ...)
//!
//! Both serialize as internally tagged JSON so they can also travel as JSON
//! Lines if a gateway ever runs out of process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Events (gateway -> core)
// ============================================================================

/// An event emitted by a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The gateway connected and is ready to receive commands.
    Ready { gateway: String },
    /// A user sent a message the relay should answer.
    MessageReceived(MessageReceivedData),
    /// A user asked to forget their conversation history.
    ResetHistory {
        routing: RoutingContext,
        sender: Sender,
    },
    /// A non-fatal gateway error.
    Error { message: String },
}

/// Payload of [`GatewayEvent::MessageReceived`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceivedData {
    /// Platform message id, used to thread the reply.
    pub message_id: String,
    pub routing: RoutingContext,
    pub sender: Sender,
    /// The typed text with any bot mention stripped. May be empty.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<MediaPayload>,
    pub timestamp: DateTime<Utc>,
}

/// Where a message came from and where the reply goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    pub channel_id: String,
    /// `None` for direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

/// The author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    #[serde(default)]
    pub username: String,
    /// Whether the platform reports the author as a guild administrator.
    #[serde(default)]
    pub is_admin: bool,
}

/// A file attached to an incoming message, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// ============================================================================
// Commands (core -> gateway)
// ============================================================================

/// A command sent from the core to a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Post a message, optionally threaded as a reply and carrying a text file.
    SendMessage {
        channel_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<FilePayload>,
    },
    /// Show a typing indicator in the channel.
    SendTyping { channel_id: String },
}

/// A plain-text file uploaded alongside a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_received_is_internally_tagged() {
        let event = GatewayEvent::MessageReceived(MessageReceivedData {
            message_id: "m1".to_string(),
            routing: RoutingContext {
                channel_id: "c1".to_string(),
                guild_id: None,
            },
            sender: Sender {
                id: "u1".to_string(),
                username: "alice".to_string(),
                is_admin: false,
            },
            text: "hello".to_string(),
            attachments: vec![],
            timestamp: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_received");
        assert_eq!(json["routing"]["channel_id"], "c1");
        assert!(json["routing"].get("guild_id").is_none());
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn send_message_parses_without_optional_fields() {
        let json = r#"{"type":"send_message","channel_id":"c1","content":"hi"}"#;
        let command: GatewayCommand = serde_json::from_str(json).unwrap();
        match command {
            GatewayCommand::SendMessage {
                channel_id,
                reply_to,
                content,
                file,
            } => {
                assert_eq!(channel_id, "c1");
                assert_eq!(content, "hi");
                assert!(reply_to.is_none());
                assert!(file.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn sender_admin_flag_defaults_to_false() {
        let sender: Sender = serde_json::from_str(r#"{"id":"u1"}"#).unwrap();
        assert!(!sender.is_admin);
        assert!(sender.username.is_empty());
    }
}
