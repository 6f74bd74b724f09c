//! Voice presence supervisor.
//!
//! One monitoring task per user. Each task sleeps for the award interval,
//! re-checks where the user is, and pays one point when they are still in the
//! channel the session started in. Any other answer, including a failed
//! lookup, ends the session. The final partial interval is never paid.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ledger::ReputationLedger;
use crate::metrics::RelayMetrics;
use crate::platform::PresenceProbe;

pub const DEFAULT_AWARD_INTERVAL: Duration = Duration::from_secs(30);

/// What a voice state event did to the session table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition {
    Started,
    AlreadyTracked,
    Stopped,
    Ignored,
}

#[derive(Debug)]
struct Session {
    channel_id: String,
    session_id: u64,
    cancel: CancellationToken,
}

struct Shared {
    ledger: Arc<ReputationLedger>,
    probe: Arc<dyn PresenceProbe>,
    metrics: Arc<RelayMetrics>,
    award_interval: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Shared {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct VoiceSupervisor {
    shared: Arc<Shared>,
    next_session: AtomicU64,
    root: CancellationToken,
}

impl VoiceSupervisor {
    pub fn new(
        ledger: Arc<ReputationLedger>,
        probe: Arc<dyn PresenceProbe>,
        metrics: Arc<RelayMetrics>,
        award_interval: Duration,
        root: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ledger,
                probe,
                metrics,
                award_interval,
                sessions: Mutex::new(HashMap::new()),
            }),
            next_session: AtomicU64::new(1),
            root,
        }
    }

    /// Feed a voice state change. `channel_id` is `None` when the user left voice.
    pub fn on_voice_state(&self, user_id: &str, channel_id: Option<&str>) -> VoiceTransition {
        let Some(channel_id) = channel_id else {
            return match self.shared.sessions().remove(user_id) {
                Some(session) => {
                    session.cancel.cancel();
                    info!(user_id, channel_id = %session.channel_id, "user left voice");
                    VoiceTransition::Stopped
                }
                None => VoiceTransition::Ignored,
            };
        };

        if self.root.is_cancelled() {
            return VoiceTransition::Ignored;
        }

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();
        {
            let mut sessions = self.shared.sessions();
            if let Some(existing) = sessions.get(user_id) {
                if existing.channel_id == channel_id {
                    return VoiceTransition::AlreadyTracked;
                }
                existing.cancel.cancel();
                debug!(user_id, from = %existing.channel_id, to = channel_id, "user moved voice channel");
            }
            sessions.insert(
                user_id.to_string(),
                Session {
                    channel_id: channel_id.to_string(),
                    session_id,
                    cancel: cancel.clone(),
                },
            );
        }

        self.shared.ledger.ensure_user(user_id);
        info!(user_id, channel_id, "user joined voice channel");

        let shared = self.shared.clone();
        let user_id = user_id.to_string();
        let channel_id = channel_id.to_string();
        tokio::spawn(async move {
            let awarded = monitor_presence(&shared, &user_id, &channel_id, &cancel).await;
            debug!(user_id = %user_id, channel_id = %channel_id, awarded, "voice session ended");

            let mut sessions = shared.sessions();
            if sessions
                .get(&user_id)
                .is_some_and(|s| s.session_id == session_id)
            {
                sessions.remove(&user_id);
            }
        });

        VoiceTransition::Started
    }

    pub fn is_tracking(&self, user_id: &str) -> bool {
        self.shared.sessions().contains_key(user_id)
    }

    /// Channel the user is currently being paid for, if any.
    pub fn tracked_channel(&self, user_id: &str) -> Option<String> {
        self.shared
            .sessions()
            .get(user_id)
            .map(|s| s.channel_id.clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.sessions().len()
    }

    /// Stop every monitor and refuse new ones.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.shared.sessions().clear();
    }
}

async fn monitor_presence(
    shared: &Shared,
    user_id: &str,
    channel_id: &str,
    cancel: &CancellationToken,
) -> u64 {
    let mut awarded = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.award_interval) => {}
        }

        let current = match shared.probe.voice_channel_of(user_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(user_id, channel_id, error = %e, "voice presence lookup failed, stopping monitor");
                break;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        match current {
            Some(current) if current == channel_id => {
                let rating = shared.ledger.adjust_rating(user_id, 1);
                shared.metrics.record_voice_point();
                awarded += 1;
                info!(user_id, channel_id, rating, "voice presence point awarded");
            }
            Some(other) => {
                info!(user_id, channel_id, now_in = %other, "user no longer in tracked channel");
                break;
            }
            None => {
                info!(user_id, channel_id, "user left voice channel");
                break;
            }
        }
    }

    awarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::platform::MockPresenceProbe;

    const TICK: Duration = DEFAULT_AWARD_INTERVAL;

    fn supervisor(probe: MockPresenceProbe) -> (VoiceSupervisor, Arc<ReputationLedger>) {
        let ledger = Arc::new(ReputationLedger::new(Vec::<String>::new()));
        let sup = VoiceSupervisor::new(
            ledger.clone(),
            Arc::new(probe),
            Arc::new(RelayMetrics::new()),
            TICK,
            CancellationToken::new(),
        );
        (sup, ledger)
    }

    async fn wait_intervals(n: u32) {
        tokio::time::sleep(TICK * n + Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_confirmed_intervals() {
        let mut probe = MockPresenceProbe::new();
        let mut calls = 0;
        probe.expect_voice_channel_of().times(4).returning(move |_| {
            calls += 1;
            Ok(if calls <= 3 { Some("C1".to_string()) } else { None })
        });

        let (sup, ledger) = supervisor(probe);
        assert_eq!(sup.on_voice_state("U1", Some("C1")), VoiceTransition::Started);

        wait_intervals(3).await;
        assert_eq!(ledger.get_rating("U1"), 3);
        assert!(sup.is_tracking("U1"));

        wait_intervals(3).await;
        assert_eq!(ledger.get_rating("U1"), 3);
        assert!(!sup.is_tracking("U1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_on_second_check_stops() {
        let mut probe = MockPresenceProbe::new();
        let mut calls = 0;
        probe.expect_voice_channel_of().times(2).returning(move |_| {
            calls += 1;
            Ok(if calls == 1 { Some("C1".to_string()) } else { None })
        });

        let (sup, ledger) = supervisor(probe);
        sup.on_voice_state("U1", Some("C1"));

        wait_intervals(5).await;
        assert_eq!(ledger.get_rating("U1"), 1);
        assert_eq!(sup.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moved_elsewhere_stops() {
        let mut probe = MockPresenceProbe::new();
        probe
            .expect_voice_channel_of()
            .times(1)
            .returning(|_| Ok(Some("C9".to_string())));

        let (sup, ledger) = supervisor(probe);
        sup.on_voice_state("U1", Some("C1"));

        wait_intervals(3).await;
        assert_eq!(ledger.get_rating("U1"), 0);
        assert!(!sup.is_tracking("U1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_terminates_without_retry() {
        let mut probe = MockPresenceProbe::new();
        probe
            .expect_voice_channel_of()
            .times(1)
            .returning(|_| {
                Err(BridgeError::platform(
                    "voice lookup",
                    std::io::Error::new(std::io::ErrorKind::Other, "cache not ready"),
                ))
            });

        let (sup, ledger) = supervisor(probe);
        sup.on_voice_state("U1", Some("C1"));

        wait_intervals(4).await;
        // joined users exist even when never paid
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get_rating("U1"), 0);
        assert!(!sup.is_tracking("U1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_same_channel_is_deduplicated() {
        let mut probe = MockPresenceProbe::new();
        probe
            .expect_voice_channel_of()
            .returning(|_| Ok(Some("C1".to_string())));

        let (sup, ledger) = supervisor(probe);
        assert_eq!(sup.on_voice_state("U1", Some("C1")), VoiceTransition::Started);
        assert_eq!(
            sup.on_voice_state("U1", Some("C1")),
            VoiceTransition::AlreadyTracked
        );

        wait_intervals(3).await;
        assert_eq!(ledger.get_rating("U1"), 3);
        sup.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_restarts_in_new_channel() {
        let mut probe = MockPresenceProbe::new();
        probe
            .expect_voice_channel_of()
            .returning(|_| Ok(Some("C2".to_string())));

        let (sup, ledger) = supervisor(probe);
        sup.on_voice_state("U1", Some("C1"));
        assert_eq!(sup.on_voice_state("U1", Some("C2")), VoiceTransition::Started);
        assert_eq!(sup.tracked_channel("U1").as_deref(), Some("C2"));

        wait_intervals(2).await;
        assert_eq!(ledger.get_rating("U1"), 2);
        assert_eq!(sup.active_sessions(), 1);
        sup.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_cancels_session() {
        let mut probe = MockPresenceProbe::new();
        probe
            .expect_voice_channel_of()
            .returning(|_| Ok(Some("C1".to_string())));

        let (sup, ledger) = supervisor(probe);
        sup.on_voice_state("U1", Some("C1"));
        wait_intervals(1).await;
        assert_eq!(ledger.get_rating("U1"), 1);

        assert_eq!(sup.on_voice_state("U1", None), VoiceTransition::Stopped);
        wait_intervals(3).await;
        assert_eq!(ledger.get_rating("U1"), 1);
        assert_eq!(sup.on_voice_state("U1", None), VoiceTransition::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let mut probe = MockPresenceProbe::new();
        probe
            .expect_voice_channel_of()
            .returning(|_| Ok(Some("C1".to_string())));

        let (sup, ledger) = supervisor(probe);
        sup.on_voice_state("U1", Some("C1"));
        sup.on_voice_state("U2", Some("C1"));
        sup.shutdown();

        wait_intervals(3).await;
        assert_eq!(ledger.get_rating("U1"), 0);
        assert_eq!(ledger.get_rating("U2"), 0);
        assert_eq!(sup.on_voice_state("U3", Some("C1")), VoiceTransition::Ignored);
    }
}
