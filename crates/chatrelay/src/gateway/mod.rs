//! Glue between platform gateways and the [`Dispatcher`].
//!
//! ```text
//!  Gateway (Discord, ...)
//!       │  GatewayEvent over mpsc
//!       ▼
//!  GatewayRouter::spawn()        one task per event
//!       │
//!       ├─ ResetHistory    → Dispatcher::reset_history()
//!       └─ MessageReceived → Dispatcher::handle_incoming()
//!       │
//!       ▼  GatewayCommand over mpsc
//!  Gateway
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use chatrelay_gateway_protocol::{
    FilePayload, GatewayCommand, GatewayEvent, MessageReceivedData, RoutingContext, Sender,
};

#[cfg(feature = "gateway-discord")]
pub use chatrelay_gateway_discord::{DiscordConfig, DiscordGateway};

use crate::attachment::AttachmentRef;
use crate::dispatcher::{Dispatcher, IncomingMessage, Reply};

/// Channel depth between gateways and the core.
pub const CHANNEL_CAPACITY: usize = 256;

/// Discord drops the typing indicator after about ten seconds.
const TYPING_REFRESH: Duration = Duration::from_secs(8);

impl From<MessageReceivedData> for IncomingMessage {
    fn from(data: MessageReceivedData) -> Self {
        Self {
            guild_id: data.routing.guild_id,
            user_id: data.sender.id,
            is_admin: data.sender.is_admin,
            text: data.text,
            attachments: data.attachments.into_iter().map(AttachmentRef::from).collect(),
        }
    }
}

/// Routes gateway events to the dispatcher and replies through commands.
#[derive(Clone)]
pub struct GatewayRouter {
    dispatcher: Dispatcher,
    commands: mpsc::Sender<GatewayCommand>,
}

impl GatewayRouter {
    pub fn new(dispatcher: Dispatcher, commands: mpsc::Sender<GatewayCommand>) -> Self {
        Self {
            dispatcher,
            commands,
        }
    }

    /// Consume `events` until the channel closes or `shutdown` fires.
    pub fn spawn(
        self,
        mut events: mpsc::Receiver<GatewayEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            let router = self.clone();
                            tokio::spawn(async move { router.handle_event(event).await });
                        }
                        None => break,
                    },
                }
            }
            debug!("Gateway router stopped");
        })
    }

    pub async fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready { gateway } => info!(gateway = %gateway, "Gateway ready"),
            GatewayEvent::Error { message } => {
                warn!(message = %message, "Gateway reported an error");
            }
            GatewayEvent::ResetHistory { routing, sender } => {
                let reply = self.dispatcher.reset_history(&sender.id);
                self.reply(routing.channel_id, None, reply).await;
            }
            GatewayEvent::MessageReceived(data) => {
                let channel_id = data.routing.channel_id.clone();
                let message_id = data.message_id.clone();
                let reply = self.answer_with_typing(&channel_id, data.into()).await;
                self.reply(channel_id, Some(message_id), reply).await;
            }
        }
    }

    /// Run the dispatcher while keeping the typing indicator alive.
    async fn answer_with_typing(&self, channel_id: &str, message: IncomingMessage) -> Reply {
        self.send(GatewayCommand::SendTyping {
            channel_id: channel_id.to_string(),
        })
        .await;

        let work = self.dispatcher.handle_incoming(message);
        tokio::pin!(work);
        let mut typing = tokio::time::interval_at(Instant::now() + TYPING_REFRESH, TYPING_REFRESH);
        loop {
            tokio::select! {
                biased;
                _ = typing.tick() => {
                    self.send(GatewayCommand::SendTyping {
                        channel_id: channel_id.to_string(),
                    })
                    .await;
                }
                reply = &mut work => return reply,
            }
        }
    }

    async fn reply(&self, channel_id: String, reply_to: Option<String>, reply: Reply) {
        self.send(GatewayCommand::SendMessage {
            channel_id,
            reply_to,
            content: reply.content,
            file: reply.file.map(|file| FilePayload {
                name: file.name,
                content: file.content,
            }),
        })
        .await;
    }

    async fn send(&self, command: GatewayCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("Gateway command channel closed, dropping command");
        }
    }
}
