//! Bidirectional relay between the bridged Discord channel and Telegram chat.
//!
//! Each inbound stream is handled by its own task, so within a stream events
//! are relayed in receipt order. Failures are logged and counted; nothing here
//! propagates an error to the caller.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::commands;
use crate::error::{BridgeError, Result};
use crate::ledger::ReputationLedger;
use crate::markdown::escape_markdown_v2;
use crate::media::{self, MediaKind};
use crate::metrics::RelayMetrics;
use crate::platform::{DiscordOutbound, MediaFetcher, TelegramOutbound};

/// Static routing for one bridge instance
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub discord_channel_id: String,
    pub telegram_chat_id: i64,
    pub command_prefix: String,
    pub media_dir: PathBuf,
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordAttachment {
    pub url: String,
    pub content_type: Option<String>,
}

impl DiscordAttachment {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|t| t.starts_with("image/"))
    }
}

/// A message posted in a Discord channel the bot can see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordMessage {
    pub author_id: String,
    pub author_name: String,
    pub channel_id: String,
    pub content: String,
    pub attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramMedia {
    pub kind: MediaKind,
    pub file_id: String,
}

/// A message received from Telegram's update stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramMessage {
    pub chat_id: i64,
    pub author: Option<String>,
    pub text: Option<String>,
    pub media: Vec<TelegramMedia>,
}

/// What the pipeline did with one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Dropped,
    Command,
    Forwarded { sent: usize, failed: usize },
}

#[derive(Debug, Default)]
struct Tally {
    sent: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, result: Result<()>) -> bool {
        match result {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(_) => {
                self.failed += 1;
                false
            }
        }
    }

    fn outcome(self) -> RelayOutcome {
        if self.sent + self.failed == 0 {
            RelayOutcome::Dropped
        } else {
            RelayOutcome::Forwarded {
                sent: self.sent,
                failed: self.failed,
            }
        }
    }
}

pub struct RelayPipeline {
    pub(crate) config: RelayConfig,
    pub(crate) ledger: Arc<ReputationLedger>,
    pub(crate) metrics: Arc<RelayMetrics>,
    discord: Arc<dyn DiscordOutbound>,
    telegram: Arc<dyn TelegramOutbound>,
    fetcher: Arc<dyn MediaFetcher>,
    discord_self: OnceLock<String>,
}

impl RelayPipeline {
    pub fn new(
        config: RelayConfig,
        ledger: Arc<ReputationLedger>,
        metrics: Arc<RelayMetrics>,
        discord: Arc<dyn DiscordOutbound>,
        telegram: Arc<dyn TelegramOutbound>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        Self {
            config,
            ledger,
            metrics,
            discord,
            telegram,
            fetcher,
            discord_self: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Record the bot's own Discord user id once the gateway reports it.
    pub fn set_discord_identity(&self, bot_user_id: impl Into<String>) {
        if self.discord_self.set(bot_user_id.into()).is_err() {
            debug!("discord identity already set");
        }
    }

    /// True for events authored by the bridge's own Discord account.
    pub fn is_self(&self, author_id: &str) -> bool {
        self.discord_self.get().is_some_and(|id| id == author_id)
    }

    /// Discord → Telegram: drop, run a command, or forward text and images.
    pub async fn handle_discord(&self, msg: DiscordMessage) -> RelayOutcome {
        if self.is_self(&msg.author_id) || msg.channel_id != self.config.discord_channel_id {
            self.metrics.record_dropped();
            return RelayOutcome::Dropped;
        }

        debug!(author = %msg.author_name, channel_id = %msg.channel_id, "discord message received");

        if let Some(invocation) = commands::parse(&self.config.command_prefix, &msg.content) {
            self.handle_command(&msg, invocation).await;
            return RelayOutcome::Command;
        }

        let chat_id = self.config.telegram_chat_id;
        let mut tally = Tally::default();

        if !msg.content.is_empty() {
            let text = format!(
                "🎧:\n*{}*: {}",
                escape_markdown_v2(&msg.author_name),
                escape_markdown_v2(&msg.content)
            );
            let result = self.telegram.send_markdown(chat_id, &text).await;
            if let Err(e) = &result {
                warn!(error = %e, "failed to send message to Telegram");
            }
            if tally.record(result) {
                self.metrics.record_to_telegram();
            }
        }

        for attachment in msg.attachments.iter().filter(|a| a.is_image()) {
            let caption = format!("🎧:\n {}", msg.author_name);
            let result = self
                .telegram
                .send_photo_url(chat_id, &attachment.url, &caption)
                .await;
            if let Err(e) = &result {
                warn!(url = %attachment.url, error = %e, "failed to send image to Telegram");
            }
            if tally.record(result) {
                self.metrics.record_media();
            }
        }

        self.finish(tally)
    }

    /// Telegram → Discord: forward text, then re-upload photos, voice notes
    /// and round videos through a temporary file.
    pub async fn handle_telegram(&self, msg: TelegramMessage) -> RelayOutcome {
        if msg.chat_id != self.config.telegram_chat_id {
            self.metrics.record_dropped();
            return RelayOutcome::Dropped;
        }

        let author = msg.author.as_deref().unwrap_or("unknown");
        let channel_id = &self.config.discord_channel_id;
        let mut tally = Tally::default();

        if let Some(text) = msg.text.as_deref().filter(|t| !t.is_empty()) {
            let result = self
                .discord
                .send_message(channel_id, &format!("➤ \n**{author}**: {text}"))
                .await;
            if let Err(e) = &result {
                warn!(error = %e, "failed to send text message to Discord");
            }
            if tally.record(result) {
                self.metrics.record_to_discord();
            }
        }

        for item in &msg.media {
            let result = self.relay_media(item, author).await;
            if let Err(e) = &result {
                warn!(kind = ?item.kind, error = %e, "failed to relay Telegram media");
            }
            if tally.record(result) {
                self.metrics.record_media();
            }
        }

        self.finish(tally)
    }

    async fn relay_media(&self, item: &TelegramMedia, author: &str) -> Result<()> {
        let url = self.telegram.file_url(&item.file_id).await?;

        tokio::fs::create_dir_all(&self.config.media_dir)
            .await
            .map_err(|e| BridgeError::io(&self.config.media_dir, e))?;
        let path = media::temp_file_path(&self.config.media_dir, item.kind);

        if let Err(e) = self.fetcher.download(&url, &path).await {
            media::discard(&path).await;
            return Err(e);
        }

        let result = self
            .discord
            .send_file(&self.config.discord_channel_id, &path, &format!("➤ {author}:"))
            .await;
        media::discard(&path).await;

        if result.is_ok() {
            info!(kind = ?item.kind, author, "telegram media relayed to Discord");
        }
        result
    }

    pub(crate) async fn reply_discord(&self, channel_id: &str, text: &str) {
        if let Err(e) = self.discord.send_message(channel_id, text).await {
            self.metrics.record_failure();
            warn!(channel_id, error = %e, "failed to send command reply");
        }
    }

    fn finish(&self, tally: Tally) -> RelayOutcome {
        for _ in 0..tally.failed {
            self.metrics.record_failure();
        }
        let outcome = tally.outcome();
        if outcome == RelayOutcome::Dropped {
            self.metrics.record_dropped();
        }
        outcome
    }
}
