use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Relay counters shared by every bridge task
#[derive(Debug, Default)]
pub struct RelayMetrics {
    to_telegram: AtomicU64,
    to_discord: AtomicU64,
    media_forwarded: AtomicU64,
    send_failures: AtomicU64,
    commands: AtomicU64,
    dropped: AtomicU64,
    voice_points: AtomicU64,
}

/// Point-in-time copy of the counters, for heartbeat logs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub to_telegram: u64,
    pub to_discord: u64,
    pub media_forwarded: u64,
    pub send_failures: u64,
    pub commands: u64,
    pub dropped: u64,
    pub voice_points: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_to_telegram(&self) {
        self.to_telegram.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_to_discord(&self) {
        self.to_discord.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_media(&self) {
        self.media_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_voice_point(&self) {
        self.voice_points.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            to_telegram: self.to_telegram.load(Ordering::Relaxed),
            to_discord: self.to_discord.load(Ordering::Relaxed),
            media_forwarded: self.media_forwarded.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            voice_points: self.voice_points.load(Ordering::Relaxed),
        }
    }
}
