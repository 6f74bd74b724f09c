//! Temporary files used while re-uploading Telegram media to Discord.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Telegram media the bridge forwards to Discord
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Voice,
    VideoNote,
}

impl MediaKind {
    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Voice => "voice",
            Self::VideoNote => "video",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Voice => "ogg",
            Self::VideoNote => "mp4",
        }
    }
}

/// Timestamped path under `dir`, e.g. `content/photo_1700000000123456789_0.jpg`.
/// The sequence suffix keeps names unique within one clock tick.
pub fn temp_file_path(dir: &Path, kind: MediaKind) -> PathBuf {
    let now = chrono::Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        "{}_{}_{}.{}",
        kind.file_prefix(),
        nanos,
        seq,
        kind.extension()
    ))
}

/// Delete a temporary media file, logging instead of failing.
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temporary media file");
        }
    }
}
