//! Discord gateway for Chatrelay.
//!
//! Listens for direct messages and messages that mention the bot, turns them
//! into [`GatewayEvent`]s and carries out [`GatewayCommand`]s coming back
//! from the core.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serenity::all::{
    ChannelId, Client, Context, CreateAttachment, CreateMessage, EventHandler, GatewayIntents,
    GuildId, Http, Message, MessageId, Permissions, Ready, RoleId, UserId,
};
use serenity::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use chatrelay_gateway_protocol::{
    GatewayCommand, GatewayEvent, MediaPayload, MessageReceivedData, RoutingContext, Sender,
};

/// Text command that clears the author's conversation memory.
pub const RESET_COMMAND: &str = "!reset";

const GATEWAY_NAME: &str = "discord";

/// Configuration for the Discord gateway.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
}

/// Built-in Discord gateway.
pub struct DiscordGateway {
    config: DiscordConfig,
}

impl DiscordGateway {
    pub fn new(config: DiscordConfig) -> Self {
        Self { config }
    }

    /// Connect to Discord and run until the connection ends.
    ///
    /// Events go out on `events`. Commands are read from `commands` until
    /// that channel closes.
    pub async fn run(
        self,
        events: mpsc::Sender<GatewayEvent>,
        commands: mpsc::Receiver<GatewayCommand>,
    ) -> Result<()> {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            events,
            bot_id: OnceLock::new(),
        };

        let mut client = Client::builder(&self.config.token, intents)
            .event_handler(handler)
            .await
            .context("failed to build Discord client")?;

        let commands_task = tokio::spawn(run_commands(client.http.clone(), commands));

        let result = client.start().await.context("Discord client stopped");
        commands_task.abort();
        result
    }
}

// ============================================================================
// Events (Discord -> core)
// ============================================================================

struct Handler {
    events: mpsc::Sender<GatewayEvent>,
    bot_id: OnceLock<UserId>,
}

impl Handler {
    async fn emit(&self, event: GatewayEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Gateway event channel closed, dropping Discord event");
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "Discord gateway connected");
        let _ = self.bot_id.set(ready.user.id);
        self.emit(GatewayEvent::Ready {
            gateway: GATEWAY_NAME.to_string(),
        })
        .await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let is_direct = msg.guild_id.is_none();
        let mentioned = match self.bot_id.get() {
            Some(bot_id) => msg.mentions_user_id(*bot_id),
            None => msg.mentions_me(&ctx).await.unwrap_or(false),
        };
        if !is_direct && !mentioned {
            return;
        }

        let text = strip_mentions(&msg.content, self.bot_id.get().copied());
        if text.is_empty() && msg.attachments.is_empty() {
            return;
        }

        let routing = RoutingContext {
            channel_id: msg.channel_id.to_string(),
            guild_id: msg.guild_id.map(|id| id.to_string()),
        };
        let sender = Sender {
            id: msg.author.id.to_string(),
            username: msg.author.name.clone(),
            is_admin: is_administrator(&ctx, &msg).await,
        };

        debug!(
            channel_id = %routing.channel_id,
            user_id = %sender.id,
            attachments = msg.attachments.len(),
            "Discord message received"
        );

        if text == RESET_COMMAND {
            self.emit(GatewayEvent::ResetHistory { routing, sender }).await;
            return;
        }

        let attachments = msg
            .attachments
            .iter()
            .map(|a| MediaPayload {
                url: a.url.clone(),
                name: a.filename.clone(),
                mime_type: a.content_type.clone(),
                size: Some(u64::from(a.size)),
            })
            .collect();

        self.emit(GatewayEvent::MessageReceived(MessageReceivedData {
            message_id: msg.id.to_string(),
            routing,
            sender,
            text,
            attachments,
            timestamp: DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0)
                .unwrap_or_else(Utc::now),
        }))
        .await;
    }
}

/// Remove `<@id>` and `<@!id>` mentions of the bot and trim.
fn strip_mentions(content: &str, bot_id: Option<UserId>) -> String {
    let Some(bot_id) = bot_id else {
        return content.trim().to_string();
    };
    content
        .replace(&format!("<@{bot_id}>"), "")
        .replace(&format!("<@!{bot_id}>"), "")
        .trim()
        .to_string()
}

/// Whether the author administers the guild the message was posted in.
///
/// Message events carry the member's role ids but not their permissions, so
/// the guild's roles are fetched to resolve them.
async fn is_administrator(ctx: &Context, msg: &Message) -> bool {
    let (Some(guild_id), Some(member)) = (msg.guild_id, msg.member.as_deref()) else {
        return false;
    };
    if member.permissions.is_some_and(|p| p.administrator()) {
        return true;
    }

    let guild = match guild_id.to_partial_guild(ctx).await {
        Ok(guild) => guild,
        Err(e) => {
            warn!(guild_id = %guild_id, error = %e, "Failed to load guild roles");
            return false;
        }
    };
    if guild.owner_id == msg.author.id {
        return true;
    }
    let role_permissions: HashMap<RoleId, Permissions> = guild
        .roles
        .iter()
        .map(|(id, role)| (*id, role.permissions))
        .collect();
    grants_administrator(guild_id, &member.roles, &role_permissions)
}

/// Whether the member's roles, plus the implicit `@everyone` role, include
/// the administrator permission.
fn grants_administrator(
    guild_id: GuildId,
    member_roles: &[RoleId],
    role_permissions: &HashMap<RoleId, Permissions>,
) -> bool {
    let everyone = RoleId::new(guild_id.get());
    member_roles
        .iter()
        .chain(std::iter::once(&everyone))
        .filter_map(|id| role_permissions.get(id))
        .any(|permissions| permissions.administrator())
}

// ============================================================================
// Commands (core -> Discord)
// ============================================================================

async fn run_commands(http: Arc<Http>, mut commands: mpsc::Receiver<GatewayCommand>) {
    while let Some(command) = commands.recv().await {
        if let Err(e) = execute(&http, command).await {
            error!(error = %e, "Failed to execute Discord command");
        }
    }
    debug!("Discord command channel closed");
}

async fn execute(http: &Arc<Http>, command: GatewayCommand) -> Result<()> {
    match command {
        GatewayCommand::SendMessage {
            channel_id,
            reply_to,
            content,
            file,
        } => {
            let channel = parse_channel(&channel_id)?;
            let mut builder = CreateMessage::new().content(content);
            if let Some(reply_to) = reply_to
                .as_deref()
                .and_then(|id| id.parse::<u64>().ok())
                .filter(|id| *id != 0)
            {
                builder = builder.reference_message((channel, MessageId::new(reply_to)));
            }
            if let Some(file) = file {
                builder = builder.add_file(CreateAttachment::bytes(
                    file.content.into_bytes(),
                    file.name,
                ));
            }
            channel
                .send_message(http.as_ref(), builder)
                .await
                .context("failed to send Discord message")?;
        }
        GatewayCommand::SendTyping { channel_id } => {
            parse_channel(&channel_id)?
                .broadcast_typing(http.as_ref())
                .await
                .context("failed to send typing indicator")?;
        }
    }
    Ok(())
}

fn parse_channel(channel_id: &str) -> Result<ChannelId> {
    let id: u64 = channel_id
        .parse()
        .with_context(|| format!("invalid Discord channel id: {channel_id}"))?;
    anyhow::ensure!(id != 0, "invalid Discord channel id: {channel_id}");
    Ok(ChannelId::new(id))
}
