//! Seams between the bridge core and the chat platform clients.
//!
//! The relay pipeline and voice supervisor only talk to these traits, so the
//! serenity and teloxide adapters stay thin and tests can swap in fakes.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::{BridgeError, Result};

/// Outbound Discord operations
#[async_trait]
pub trait DiscordOutbound: Send + Sync {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Upload a local file with `caption` as the message content.
    async fn send_file(&self, channel_id: &str, path: &Path, caption: &str) -> Result<()>;
}

/// Outbound Telegram operations
#[async_trait]
pub trait TelegramOutbound: Send + Sync {
    /// Send text that is already MarkdownV2-escaped.
    async fn send_markdown(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_photo_url(&self, chat_id: i64, url: &str, caption: &str) -> Result<()>;

    /// Resolve a file id to a direct download URL.
    async fn file_url(&self, file_id: &str) -> Result<String>;
}

/// Voice presence lookup across every guild the bot can see
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceProbe: Send + Sync {
    async fn voice_channel_of(&self, user_id: &str) -> Result<Option<String>>;
}

/// Plain byte-stream download
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// `MediaFetcher` backed by reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

// File URLs embed the bot token; keep them out of error text and logs.
fn download_error(e: reqwest::Error) -> BridgeError {
    BridgeError::Download(e.without_url().to_string())
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(download_error)?;

        if !response.status().is_success() {
            return Err(BridgeError::Download(format!("HTTP {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| BridgeError::io(dest, e))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(download_error)?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| BridgeError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| BridgeError::io(dest, e))?;
        Ok(written)
    }
}
