use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rankbridge::bridge::Bridge;
use rankbridge::config::Config;

/// Discord <-> Telegram bridge that ranks members by time spent in voice
#[derive(Parser, Debug)]
#[command(name = "rankbridge", version, about)]
struct Args {
    /// TOML configuration file; without it settings come from the environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let config = match &args.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => Config::from_env()?,
    };

    info!(
        discord_channel = %config.discord.channel_id,
        telegram_chat = config.telegram.chat_id,
        store = %config.ranking.store_path.display(),
        "rankbridge starting"
    );

    let bridge = Bridge::start(config).await?;
    bridge.run().await?;
    Ok(())
}
