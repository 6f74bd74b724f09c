use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::relay::RelayConfig;

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    /// Text channel bridged to Telegram
    #[serde(default)]
    pub channel_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub admin_file: PathBuf,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    #[serde(default = "default_award_interval")]
    pub award_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("users.json")
}

fn default_save_interval() -> u64 {
    1
}

fn default_award_interval() -> u64 {
    30
}

fn default_prefix() -> String {
    crate::commands::DEFAULT_PREFIX.to_string()
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_heartbeat() -> u64 {
    300
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            admin_file: PathBuf::new(),
            store_path: default_store_path(),
            save_interval_secs: default_save_interval(),
            award_interval_secs: default_award_interval(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            media_dir: default_media_dir(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::io(path, e))?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Configuration built only from defaults and environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            discord: DiscordConfig::default(),
            telegram: TelegramConfig::default(),
            ranking: RankingConfig::default(),
            relay: RelaySettings::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override credentials and routing from `DISCORD_TOKEN`, `TELEGRAM_TOKEN`,
    /// `TELEGRAM_CHAT_ID`, `DISCORD_CHANNEL_ID` and `ADMIN_FILE_PATH`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.token = token;
        }
        if let Some(channel) = get("DISCORD_CHANNEL_ID") {
            self.discord.channel_id = channel;
        }
        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.token = token;
        }
        if let Some(chat) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat
                .trim()
                .parse()
                .map_err(|_| BridgeError::Config(format!("invalid TELEGRAM_CHAT_ID '{chat}'")))?;
        }
        if let Some(path) = get("ADMIN_FILE_PATH") {
            self.ranking.admin_file = PathBuf::from(path);
        }
        Ok(())
    }

    /// Reject configurations the bridge cannot start with.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.discord.token.is_empty() {
            missing.push("discord.token");
        }
        if self.discord.channel_id.is_empty() {
            missing.push("discord.channel_id");
        }
        if self.telegram.token.is_empty() {
            missing.push("telegram.token");
        }
        if self.telegram.chat_id == 0 {
            missing.push("telegram.chat_id");
        }
        if self.ranking.admin_file.as_os_str().is_empty() {
            missing.push("ranking.admin_file");
        }
        if !missing.is_empty() {
            return Err(BridgeError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        if self.ranking.save_interval_secs == 0
            || self.ranking.award_interval_secs == 0
            || self.relay.heartbeat_secs == 0
        {
            return Err(BridgeError::Config("intervals must be positive".to_string()));
        }
        if self.relay.command_prefix.is_empty() {
            return Err(BridgeError::Config("command_prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Routing handed to the relay pipeline.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            discord_channel_id: self.discord.channel_id.clone(),
            telegram_chat_id: self.telegram.chat_id,
            command_prefix: self.relay.command_prefix.clone(),
            media_dir: self.relay.media_dir.clone(),
            store_path: self.ranking.store_path.clone(),
        }
    }
}
