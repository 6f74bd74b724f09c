//! Reputation ledger: the shared, dirty-tracked map of user ratings.
//!
//! Every operation takes the ledger lock exactly once and releases it before
//! returning. Saves write a snapshot outside that lock and clear the dirty
//! flag only if nothing changed while the file was being written.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::store::{self, User};

/// Admin allow-list file layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminFile {
    pub admin_ids: Vec<String>,
}

/// Result of a save request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Skipped,
    Written,
}

#[derive(Debug, Default)]
struct LedgerState {
    users: HashMap<String, User>,
    dirty: bool,
    version: u64,
}

impl LedgerState {
    fn touch(&mut self) {
        self.dirty = true;
        self.version += 1;
    }
}

pub struct ReputationLedger {
    state: Mutex<LedgerState>,
    // one writer at a time, so an older snapshot never overwrites a newer one
    writer: Mutex<()>,
    admins: HashSet<String>,
}

impl ReputationLedger {
    pub fn new(admins: impl IntoIterator<Item = String>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            writer: Mutex::new(()),
            admins: admins.into_iter().collect(),
        }
    }

    /// Build a ledger whose admin set comes from a JSON file. Missing or
    /// malformed files are fatal to the caller.
    pub fn with_admin_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| BridgeError::io(path, e))?;
        let file: AdminFile =
            serde_json::from_str(&data).map_err(|e| BridgeError::decode(path, e))?;
        info!(path = %path.display(), admins = file.admin_ids.len(), "admin list loaded");
        Ok(Self::new(file.admin_ids))
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a zero-rated record if the id is unknown.
    pub fn ensure_user(&self, id: &str) {
        let mut state = self.lock();
        if !state.users.contains_key(id) {
            state.users.insert(id.to_string(), User::new(id, 0));
            state.touch();
        }
    }

    /// Add `delta` to the user's rating, creating the record if needed.
    /// Returns the new rating.
    pub fn adjust_rating(&self, id: &str, delta: i64) -> i64 {
        let mut state = self.lock();
        let user = state
            .users
            .entry(id.to_string())
            .or_insert_with(|| User::new(id, 0));
        user.rating = user.rating.saturating_add(delta);
        let rating = user.rating;
        state.touch();
        rating
    }

    /// Current rating, 0 for unknown ids. Never creates a record.
    pub fn get_rating(&self, id: &str) -> i64 {
        self.lock().users.get(id).map(|u| u.rating).unwrap_or(0)
    }

    /// Highest rated users first; equal ratings are ordered by id ascending.
    pub fn top_n(&self, n: usize) -> Vec<User> {
        let mut users: Vec<User> = self.lock().users.values().cloned().collect();
        users.sort_by(|a, b| b.rating.cmp(&a.rating).then_with(|| a.id.cmp(&b.id)));
        users.truncate(n);
        users
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.contains(id)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn len(&self) -> usize {
        self.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the in-memory ratings with the file content.
    pub fn load(&self, path: &Path) -> Result<usize> {
        let users = store::load(path)?;
        let count = users.len();
        let mut state = self.lock();
        state.users = users;
        state.dirty = false;
        state.version += 1;
        Ok(count)
    }

    /// Persist the ledger if it changed since the last successful save.
    /// Blocks on file I/O; async callers go through [`ReputationLedger::flush`].
    pub fn save_if_dirty(&self, path: &Path) -> Result<SaveOutcome> {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let (snapshot, version) = {
            let state = self.lock();
            if !state.dirty {
                return Ok(SaveOutcome::Skipped);
            }
            (state.users.clone(), state.version)
        };

        store::save(path, &snapshot)?;

        let mut state = self.lock();
        if state.version == version {
            state.dirty = false;
        }
        debug!(path = %path.display(), users = snapshot.len(), "ledger flushed");
        Ok(SaveOutcome::Written)
    }

    /// `save_if_dirty` on the blocking pool.
    pub async fn flush(self: Arc<Self>, path: PathBuf) -> Result<SaveOutcome> {
        tokio::task::spawn_blocking(move || self.save_if_dirty(&path)).await?
    }

    /// Flush the ledger every `every` until `cancel` fires.
    pub fn spawn_periodic_save(
        self: Arc<Self>,
        path: PathBuf,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; skip it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("periodic save stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.clone().flush(path.clone()).await {
                            warn!(path = %path.display(), error = %e, "periodic ledger save failed");
                        }
                    }
                }
            }
        })
    }
}
