use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discord::{self, BridgeHandler, CachePresence, SerenityOutbound};
use crate::error::Result;
use crate::ledger::{ReputationLedger, SaveOutcome};
use crate::metrics::RelayMetrics;
use crate::platform::HttpFetcher;
use crate::relay::RelayPipeline;
use crate::telegram::{self, TeloxideOutbound};
use crate::voice::VoiceSupervisor;

/// A fully wired bridge, authenticated against both platforms but not yet
/// receiving events.
pub struct Bridge {
    config: Config,
    ledger: Arc<ReputationLedger>,
    metrics: Arc<RelayMetrics>,
    pipeline: Arc<RelayPipeline>,
    voice: Arc<VoiceSupervisor>,
    client: serenity::Client,
    bot: teloxide::Bot,
    discord_queue: mpsc::UnboundedReceiver<crate::relay::DiscordMessage>,
    root: CancellationToken,
}

impl Bridge {
    /// Load persistent state and authenticate. Every error here is fatal.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(ReputationLedger::with_admin_file(&config.ranking.admin_file)?);
        let loaded = ledger.load(&config.ranking.store_path)?;
        info!(
            users = loaded,
            path = %config.ranking.store_path.display(),
            "ledger loaded"
        );

        let discord_out = Arc::new(SerenityOutbound::new(&config.discord.token));
        let discord_name = discord_out.verify().await?;
        info!(bot = %discord_name, "authorized on discord");

        let bot = telegram::build_bot(&config.telegram.token)?;
        let telegram_out = Arc::new(TeloxideOutbound::new(bot.clone()));
        let telegram_name = telegram_out.verify().await?;
        info!(bot = %telegram_name, "authorized on telegram");

        let metrics = Arc::new(RelayMetrics::new());
        let pipeline = Arc::new(RelayPipeline::new(
            config.relay_config(),
            ledger.clone(),
            metrics.clone(),
            discord_out,
            telegram_out,
            Arc::new(HttpFetcher::new()),
        ));

        let root = CancellationToken::new();
        let presence = Arc::new(CachePresence::new());
        let voice = Arc::new(VoiceSupervisor::new(
            ledger.clone(),
            presence.clone(),
            metrics.clone(),
            Duration::from_secs(config.ranking.award_interval_secs),
            root.child_token(),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let handler = BridgeHandler::new(pipeline.clone(), voice.clone(), presence, tx);
        let client = discord::build_client(&config.discord.token, handler).await?;

        Ok(Self {
            config,
            ledger,
            metrics,
            pipeline,
            voice,
            client,
            bot,
            discord_queue: rx,
            root,
        })
    }

    /// Run until SIGINT/SIGTERM or until the Discord gateway gives up, then
    /// flush the ledger.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            ledger,
            metrics,
            pipeline,
            voice,
            mut client,
            bot,
            discord_queue,
            root,
        } = self;

        let store_path = config.ranking.store_path.clone();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(ledger.clone().spawn_periodic_save(
            store_path.clone(),
            Duration::from_secs(config.ranking.save_interval_secs),
            root.child_token(),
        ));
        tasks.push(spawn_heartbeat(
            metrics.clone(),
            ledger.clone(),
            voice.clone(),
            Duration::from_secs(config.relay.heartbeat_secs),
            root.child_token(),
        ));
        tasks.push(tokio::spawn(telegram::run_polling(
            bot,
            pipeline.clone(),
            root.child_token(),
        )));
        tasks.push(tokio::spawn(discord::run_relay_queue(
            discord_queue,
            pipeline,
            root.child_token(),
        )));

        let shard_manager = client.shard_manager.clone();
        let mut gateway = tokio::spawn(async move { client.start().await });

        info!(
            discord_channel = %config.discord.channel_id,
            telegram_chat = config.telegram.chat_id,
            "bridge running"
        );

        tokio::select! {
            _ = shutdown_signal() => {}
            result = &mut gateway => match result {
                Ok(Ok(())) => warn!("discord gateway exited"),
                Ok(Err(e)) => error!(error = %e, "discord gateway failed"),
                Err(e) => error!(error = %e, "discord gateway task panicked"),
            },
        }

        root.cancel();
        voice.shutdown();
        flush_on_shutdown(ledger, store_path).await;

        shard_manager.shutdown_all().await;
        gateway.abort();
        for task in tasks {
            task.abort();
        }

        let snapshot = metrics.snapshot();
        info!(?snapshot, "bridge stopped");
        Ok(())
    }
}

/// Best-effort save before exit. Failures are logged, never returned.
pub async fn flush_on_shutdown(ledger: Arc<ReputationLedger>, path: PathBuf) -> bool {
    let users = ledger.len();
    match ledger.flush(path.clone()).await {
        Ok(SaveOutcome::Written) => {
            info!(path = %path.display(), users, "ledger saved before shutdown");
            true
        }
        Ok(SaveOutcome::Skipped) => true,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to save ledger on shutdown");
            false
        }
    }
}

/// Periodically log relay counters and ledger size.
pub fn spawn_heartbeat(
    metrics: Arc<RelayMetrics>,
    ledger: Arc<ReputationLedger>,
    voice: Arc<VoiceSupervisor>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = metrics.snapshot();
                    info!(
                        users = ledger.len(),
                        voice_sessions = voice.active_sessions(),
                        ?snapshot,
                        "heartbeat"
                    );
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "shutting down"),
        _ = terminate => info!(signal = "SIGTERM", "shutting down"),
    }
}
