use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, InputFile, ParseMode, UpdateKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::media::MediaKind;
use crate::platform::TelegramOutbound;
use crate::relay::{RelayPipeline, TelegramMedia, TelegramMessage};

/// Long-poll wait per `getUpdates` call; an empty result just means re-poll.
pub const POLL_TIMEOUT_SECS: u32 = 60;
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Build a bot whose HTTP timeout outlives the long-poll timeout.
pub fn build_bot(token: &str) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(u64::from(POLL_TIMEOUT_SECS) + 15))
        .build()
        .map_err(|e| BridgeError::platform("telegram http client", e))?;
    Ok(Bot::with_client(token, client))
}

pub struct TeloxideOutbound {
    bot: Bot,
}

impl TeloxideOutbound {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Check the token with `getMe`. Returns the bot username.
    pub async fn verify(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| BridgeError::platform("telegram authentication failed", e))?;
        Ok(me.user.username.clone().unwrap_or_default())
    }
}

#[async_trait]
impl TelegramOutbound for TeloxideOutbound {
    async fn send_markdown(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::MarkdownV2)
            .await
            .map_err(|e| BridgeError::platform("telegram send_message", e))?;
        Ok(())
    }

    async fn send_photo_url(&self, chat_id: i64, url: &str, caption: &str) -> Result<()> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| BridgeError::platform(format!("invalid photo url '{url}'"), e))?;
        self.bot
            .send_photo(ChatId(chat_id), InputFile::url(url))
            .caption(caption)
            .await
            .map_err(|e| BridgeError::platform("telegram send_photo", e))?;
        Ok(())
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        let file = self
            .bot
            .get_file(file_id)
            .await
            .map_err(|e| BridgeError::platform("telegram get_file", e))?;
        Ok(format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot.token(),
            file.path
        ))
    }
}

/// Convert a Telegram message into the bridge's neutral form.
pub fn to_bridge_message(msg: &Message) -> TelegramMessage {
    let author = msg
        .from
        .as_ref()
        .map(|u| u.username.clone().unwrap_or_else(|| u.full_name()));

    let mut media = Vec::new();
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        media.push(TelegramMedia {
            kind: MediaKind::Photo,
            file_id: largest.file.id.clone(),
        });
    }
    if let Some(note) = msg.video_note() {
        media.push(TelegramMedia {
            kind: MediaKind::VideoNote,
            file_id: note.file.id.clone(),
        });
    }
    if let Some(voice) = msg.voice() {
        media.push(TelegramMedia {
            kind: MediaKind::Voice,
            file_id: voice.file.id.clone(),
        });
    }

    TelegramMessage {
        chat_id: msg.chat.id.0,
        author,
        text: msg.text().map(str::to_string),
        media,
    }
}

/// Poll `getUpdates` and relay each message in order until cancelled.
pub async fn run_polling(bot: Bot, pipeline: Arc<RelayPipeline>, cancel: CancellationToken) {
    info!("starting telegram polling loop");
    let mut offset: i32 = 0;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = bot
                .get_updates()
                .offset(offset)
                .timeout(POLL_TIMEOUT_SECS)
                .allowed_updates(vec![AllowedUpdate::Message])
                .send() => result,
        };

        match result {
            Ok(updates) => {
                debug!(count = updates.len(), "got telegram updates");
                for update in updates {
                    offset = update.id.as_offset();
                    if let UpdateKind::Message(msg) = update.kind {
                        let outcome = pipeline.handle_telegram(to_bridge_message(&msg)).await;
                        debug!(chat_id = msg.chat.id.0, ?outcome, "telegram message processed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "telegram getUpdates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }

    info!("telegram polling stopped");
}
