//! Discord adapter on top of serenity.
//!
//! Gateway events are turned into the bridge's own types. Channel messages are
//! queued to a single consumer task so they are relayed in receipt order;
//! serenity dispatches each event on its own task otherwise.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use serenity::all::{
    Attachment, Cache, ChannelId, Client, Context, CreateAllowedMentions, CreateAttachment,
    CreateMessage, EventHandler, GatewayIntents, Http, Message, Ready, UserId, VoiceState,
};

use crate::error::{BridgeError, Result};
use crate::platform::{DiscordOutbound, PresenceProbe};
use crate::relay::{DiscordAttachment, DiscordMessage, RelayPipeline};
use crate::voice::VoiceSupervisor;

/// Gateway intents the bridge needs: channel text, message bodies and voice state.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES
}

fn parse_snowflake(kind: &str, raw: &str) -> Result<u64> {
    let id: u64 = raw
        .parse()
        .map_err(|e| BridgeError::platform(format!("invalid discord {kind} id '{raw}'"), e))?;
    if id == 0 {
        return Err(BridgeError::Config(format!("discord {kind} id must be non-zero")));
    }
    Ok(id)
}

/// Outgoing message that never pings: relayed text must not reach
/// `@everyone`, roles or users.
fn relayed_message(content: &str) -> CreateMessage {
    CreateMessage::new()
        .content(content)
        .allowed_mentions(CreateAllowedMentions::new())
}

/// REST side of the Discord client
pub struct SerenityOutbound {
    http: Arc<Http>,
}

impl SerenityOutbound {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }

    /// Check the token by fetching the bot account. Returns the bot name.
    pub async fn verify(&self) -> Result<String> {
        let me = self
            .http
            .get_current_user()
            .await
            .map_err(|e| BridgeError::platform("discord authentication failed", e))?;
        Ok(me.name.clone())
    }
}

#[async_trait]
impl DiscordOutbound for SerenityOutbound {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let channel = ChannelId::new(parse_snowflake("channel", channel_id)?);
        channel
            .send_message(&self.http, relayed_message(text))
            .await
            .map_err(|e| BridgeError::platform("discord send_message", e))?;
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, path: &Path, caption: &str) -> Result<()> {
        let channel = ChannelId::new(parse_snowflake("channel", channel_id)?);
        let attachment = CreateAttachment::path(path)
            .await
            .map_err(|e| BridgeError::platform("discord attachment", e))?;
        channel
            .send_files(
                &self.http,
                vec![attachment],
                relayed_message(caption),
            )
            .await
            .map_err(|e| BridgeError::platform("discord send_files", e))?;
        Ok(())
    }
}

/// Voice presence read from the gateway cache once the shard is ready
#[derive(Default)]
pub struct CachePresence {
    cache: OnceLock<Arc<Cache>>,
}

impl CachePresence {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            debug!("discord cache already attached");
        }
    }
}

#[async_trait]
impl PresenceProbe for CachePresence {
    async fn voice_channel_of(&self, user_id: &str) -> Result<Option<String>> {
        let cache = self
            .cache
            .get()
            .ok_or_else(|| BridgeError::Unavailable("discord cache".to_string()))?;
        let user = UserId::new(parse_snowflake("user", user_id)?);

        for guild_id in cache.guilds() {
            let Some(guild) = cache.guild(guild_id) else {
                continue;
            };
            if let Some(channel) = guild.voice_states.get(&user).and_then(|s| s.channel_id) {
                return Ok(Some(channel.to_string()));
            }
        }
        Ok(None)
    }
}

/// Gateway event handler feeding the relay queue and the voice supervisor
pub struct BridgeHandler {
    pipeline: Arc<RelayPipeline>,
    voice: Arc<VoiceSupervisor>,
    presence: Arc<CachePresence>,
    queue: mpsc::UnboundedSender<DiscordMessage>,
}

impl BridgeHandler {
    pub fn new(
        pipeline: Arc<RelayPipeline>,
        voice: Arc<VoiceSupervisor>,
        presence: Arc<CachePresence>,
        queue: mpsc::UnboundedSender<DiscordMessage>,
    ) -> Self {
        Self {
            pipeline,
            voice,
            presence,
            queue,
        }
    }
}

fn to_bridge_message(msg: &Message) -> DiscordMessage {
    DiscordMessage {
        author_id: msg.author.id.to_string(),
        author_name: msg.author.name.clone(),
        channel_id: msg.channel_id.to_string(),
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(to_bridge_attachment)
            .collect(),
    }
}

fn to_bridge_attachment(attachment: &Attachment) -> DiscordAttachment {
    DiscordAttachment {
        url: attachment.url.clone(),
        content_type: attachment.content_type.clone(),
    }
}

#[serenity::async_trait]
impl EventHandler for BridgeHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord bot ready"
        );
        self.pipeline.set_discord_identity(ready.user.id.to_string());
        self.presence.attach(ctx.cache.clone());
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if self.queue.send(to_bridge_message(&msg)).is_err() {
            warn!("discord relay queue closed, dropping message");
        }
    }

    async fn voice_state_update(&self, _ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let user_id = new.user_id.to_string();
        if self.pipeline.is_self(&user_id) {
            return;
        }
        let channel_id = new.channel_id.map(|c| c.to_string());
        let transition = self.voice.on_voice_state(&user_id, channel_id.as_deref());
        debug!(user_id = %user_id, channel_id = ?channel_id, ?transition, "voice state update");
    }
}

/// Build the gateway client. Nothing connects until `Client::start`.
pub async fn build_client(token: &str, handler: BridgeHandler) -> Result<Client> {
    Client::builder(token, intents())
        .event_handler(handler)
        .await
        .map_err(|e| BridgeError::platform("discord client", e))
}

/// Relay queued Discord messages one at a time until cancelled.
pub async fn run_relay_queue(
    mut queue: mpsc::UnboundedReceiver<DiscordMessage>,
    pipeline: Arc<RelayPipeline>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(msg) => {
                    let outcome = pipeline.handle_discord(msg).await;
                    debug!(?outcome, "discord message processed");
                }
                None => break,
            }
        }
    }
    info!("discord relay stopped");
}
