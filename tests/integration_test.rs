use async_trait::async_trait;
use rankbridge::error::{BridgeError, Result};
use rankbridge::ledger::ReputationLedger;
use rankbridge::media::MediaKind;
use rankbridge::metrics::RelayMetrics;
use rankbridge::platform::{DiscordOutbound, MediaFetcher, PresenceProbe, TelegramOutbound};
use rankbridge::relay::{
    DiscordMessage, RelayConfig, RelayOutcome, RelayPipeline, TelegramMedia, TelegramMessage,
};
use rankbridge::voice::{VoiceSupervisor, VoiceTransition};
use rankbridge::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingDiscord {
    messages: Mutex<Vec<String>>,
    files: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DiscordOutbound for RecordingDiscord {
    async fn send_message(&self, _channel_id: &str, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_file(&self, _channel_id: &str, path: &Path, caption: &str) -> Result<()> {
        let body = std::fs::read_to_string(path).map_err(|e| BridgeError::io(path, e))?;
        self.files.lock().unwrap().push((body, caption.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTelegram {
    texts: Mutex<Vec<String>>,
}

#[async_trait]
impl TelegramOutbound for RecordingTelegram {
    async fn send_markdown(&self, _chat_id: i64, text: &str) -> Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_photo_url(&self, _chat_id: i64, _url: &str, _caption: &str) -> Result<()> {
        Ok(())
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        Ok(format!("https://files.test/{file_id}"))
    }
}

struct WritingFetcher;

#[async_trait]
impl MediaFetcher for WritingFetcher {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        std::fs::write(dest, url).map_err(|e| BridgeError::io(dest, e))?;
        Ok(url.len() as u64)
    }
}

/// Voice presence the test can move people in and out of
#[derive(Default)]
struct ScriptedPresence {
    channels: Mutex<HashMap<String, String>>,
}

impl ScriptedPresence {
    fn join(&self, user: &str, channel: &str) {
        self.channels
            .lock()
            .unwrap()
            .insert(user.to_string(), channel.to_string());
    }

    fn leave(&self, user: &str) {
        self.channels.lock().unwrap().remove(user);
    }
}

#[async_trait]
impl PresenceProbe for ScriptedPresence {
    async fn voice_channel_of(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.channels.lock().unwrap().get(user_id).cloned())
    }
}

struct World {
    _dir: TempDir,
    store_path: PathBuf,
    ledger: Arc<ReputationLedger>,
    metrics: Arc<RelayMetrics>,
    pipeline: RelayPipeline,
    voice: VoiceSupervisor,
    presence: Arc<ScriptedPresence>,
    discord: Arc<RecordingDiscord>,
    telegram: Arc<RecordingTelegram>,
}

fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let admin_file = dir.path().join("admins.json");
    std::fs::write(&admin_file, r#"{"admin_ids": ["900"]}"#).unwrap();
    let store_path = dir.path().join("users.json");

    let ledger = Arc::new(ReputationLedger::with_admin_file(&admin_file).unwrap());
    let metrics = Arc::new(RelayMetrics::new());
    let discord = Arc::new(RecordingDiscord::default());
    let telegram = Arc::new(RecordingTelegram::default());
    let presence = Arc::new(ScriptedPresence::default());

    let pipeline = RelayPipeline::new(
        RelayConfig {
            discord_channel_id: "500".to_string(),
            telegram_chat_id: -1001,
            command_prefix: "!".to_string(),
            media_dir: dir.path().join("content"),
            store_path: store_path.clone(),
        },
        ledger.clone(),
        metrics.clone(),
        discord.clone(),
        telegram.clone(),
        Arc::new(WritingFetcher),
    );
    pipeline.set_discord_identity("1");

    let voice = VoiceSupervisor::new(
        ledger.clone(),
        presence.clone(),
        metrics.clone(),
        Duration::from_secs(30),
        CancellationToken::new(),
    );

    World {
        _dir: dir,
        store_path,
        ledger,
        metrics,
        pipeline,
        voice,
        presence,
        discord,
        telegram,
    }
}

fn discord_says(author: &str, content: &str) -> DiscordMessage {
    DiscordMessage {
        author_id: author.to_string(),
        author_name: format!("user{author}"),
        channel_id: "500".to_string(),
        content: content.to_string(),
        attachments: Vec::new(),
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Voice time earns points that show up on the leaderboard.
#[tokio::test(start_paused = true)]
async fn test_voice_time_reaches_leaderboard() {
    let w = world();
    w.presence.join("42", "vc");
    w.presence.join("43", "vc");
    assert_eq!(w.voice.on_voice_state("42", Some("vc")), VoiceTransition::Started);
    assert_eq!(w.voice.on_voice_state("43", Some("vc")), VoiceTransition::Started);

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    w.presence.leave("43");
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle().await;

    assert_eq!(w.ledger.get_rating("42"), 3);
    assert_eq!(w.ledger.get_rating("43"), 1);
    assert!(!w.voice.is_tracking("43"));

    let outcome = w.pipeline.handle_discord(discord_says("77", "!top5")).await;
    assert_eq!(outcome, RelayOutcome::Command);
    let replies = w.discord.messages.lock().unwrap().clone();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0], "Top 2:\n1. <@42> - 3 points\n2. <@43> - 1 points\n");
    assert!(w.telegram.texts.lock().unwrap().is_empty());

    w.voice.shutdown();
}

/// A non-admin cannot change ratings; an admin can, and the change is saved.
#[tokio::test]
async fn test_adjust_requires_admin_and_persists() {
    let w = world();
    w.ledger.adjust_rating("42", 10);

    w.pipeline
        .handle_discord(discord_says("77", "!adjust <@42> -15"))
        .await;
    assert_eq!(w.ledger.get_rating("42"), 10);
    assert_eq!(
        w.discord.messages.lock().unwrap().last().unwrap(),
        "❌ Only admins can adjust ratings."
    );
    assert!(!w.store_path.exists());

    w.pipeline
        .handle_discord(discord_says("900", "!adjust <@!42> -15"))
        .await;
    assert_eq!(w.ledger.get_rating("42"), -5);
    assert!(!w.ledger.is_dirty());

    let reloaded = ReputationLedger::new(Vec::<String>::new());
    assert_eq!(reloaded.load(&w.store_path).unwrap(), 1);
    assert_eq!(reloaded.get_rating("42"), -5);
}

/// Persisted state survives a restart with the same store path.
#[tokio::test]
async fn test_restart_keeps_ratings() {
    let w = world();
    w.ledger.adjust_rating("1", 5);
    w.ledger.adjust_rating("2", 7);
    assert!(bridge::flush_on_shutdown(w.ledger.clone(), w.store_path.clone()).await);

    let restarted = ReputationLedger::new(Vec::<String>::new());
    assert_eq!(restarted.load(&w.store_path).unwrap(), 2);
    let top: Vec<(String, i64)> = restarted
        .top_n(5)
        .into_iter()
        .map(|u| (u.id, u.rating))
        .collect();
    assert_eq!(top, vec![("2".to_string(), 7), ("1".to_string(), 5)]);
}

/// Telegram text and a voice note both land in the Discord channel; the temp
/// file is gone afterwards.
#[tokio::test]
async fn test_telegram_to_discord_round() {
    let w = world();
    let msg = TelegramMessage {
        chat_id: -1001,
        author: Some("anna".to_string()),
        text: Some("hello *there*".to_string()),
        media: vec![TelegramMedia {
            kind: MediaKind::Voice,
            file_id: "f-9".to_string(),
        }],
    };

    let outcome = w.pipeline.handle_telegram(msg).await;
    assert_eq!(outcome, RelayOutcome::Forwarded { sent: 2, failed: 0 });
    assert_eq!(
        w.discord.messages.lock().unwrap().as_slice(),
        ["➤ \n**anna**: hello *there*".to_string()]
    );
    assert_eq!(
        w.discord.files.lock().unwrap().as_slice(),
        [(
            "https://files.test/f-9".to_string(),
            "➤ anna:".to_string()
        )]
    );

    let media_dir = w.pipeline.config().media_dir.clone();
    assert_eq!(std::fs::read_dir(media_dir).unwrap().count(), 0);

    let snapshot = w.metrics.snapshot();
    assert_eq!(snapshot.to_discord, 1);
    assert_eq!(snapshot.media_forwarded, 1);
}

/// Commands and relayed chatter interleave while a voice session is running.
#[tokio::test(start_paused = true)]
async fn test_commands_interleave_with_voice_awards() {
    let w = world();
    w.presence.join("42", "vc");
    w.voice.on_voice_state("42", Some("vc"));

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;

    w.pipeline
        .handle_discord(discord_says("77", "!rating <@42>"))
        .await;
    w.pipeline
        .handle_discord(discord_says("77", "nice one"))
        .await;
    w.pipeline
        .handle_discord(discord_says("900", "!adjust <@42> +10"))
        .await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;

    assert_eq!(w.ledger.get_rating("42"), 12);
    let replies = w.discord.messages.lock().unwrap().clone();
    assert_eq!(replies[0], "<@42> has 1 points.");
    assert_eq!(
        replies[1],
        "✅ Rating of <@42> changed by +10 points (now 11)."
    );
    assert_eq!(w.telegram.texts.lock().unwrap().len(), 1);

    w.voice.on_voice_state("42", None);
    settle().await;
    assert_eq!(w.voice.active_sessions(), 0);
}
