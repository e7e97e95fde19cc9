//! Queue state persistence
//!
//! The queue store writes its whole state through a [`StateStore`] after every
//! mutation and reads it back once at startup. Progress updates go through
//! [`StateStore::save_progress`] so a backend can write just the one job. Backends:
//! - [`MemoryStateStore`] - keeps the last saved state in memory
//! - [`JsonFileStore`] - pretty-printed JSON file, replaced atomically
//! - [`Database`](crate::db::Database) - SQLite via sqlx

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::OrphanPolicy;
use crate::error::Result;
use crate::types::{Job, JobId, Quality, QueueSnapshot, Status};

mod json;

pub use json::JsonFileStore;

/// Reason recorded on jobs that were downloading when the process went away
pub const INTERRUPTED_REASON: &str = "interrupted";

const STATE_VERSION: u32 = 1;

fn current_version() -> u32 {
    STATE_VERSION
}

/// The persisted portion of the queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version
    #[serde(default = "current_version")]
    pub version: u32,
    /// Queued jobs in admission order
    #[serde(default)]
    pub queued: Vec<Job>,
    /// Jobs that were transferring when the state was written
    #[serde(default)]
    pub downloading: Vec<Job>,
    /// Completed jobs
    #[serde(default)]
    pub completed: Vec<Job>,
    /// Failed jobs
    #[serde(default)]
    pub failed: Vec<Job>,
    /// Quality setting
    #[serde(default)]
    pub quality: Quality,
    /// Concurrency limit
    pub max_concurrent: usize,
}

impl PersistedState {
    /// Empty state with the given settings
    pub fn empty(quality: Quality, max_concurrent: usize) -> Self {
        Self {
            version: STATE_VERSION,
            queued: Vec::new(),
            downloading: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            quality,
            max_concurrent,
        }
    }

    /// Highest job id present in any collection
    pub fn max_job_id(&self) -> Option<i64> {
        self.jobs().map(|job| job.id.0).max()
    }

    /// Iterate over every job regardless of status
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .chain(&self.failed)
    }

    /// Drop completed and failed jobs that finished more than `max_age` ago
    ///
    /// Returns the number of jobs dropped.
    pub fn prune_finished(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = now - max_age;
        let before = self.completed.len() + self.failed.len();
        self.completed
            .retain(|job| job.completed_at.unwrap_or(job.added_at) >= cutoff);
        self.failed
            .retain(|job| job.failed_at.unwrap_or(job.added_at) >= cutoff);
        before - (self.completed.len() + self.failed.len())
    }

    /// Move jobs stranded in `downloading` according to `policy`
    ///
    /// Requeued jobs go to the head of the queue in their admission order,
    /// since they were admitted before anything still waiting. Returns the
    /// number of jobs moved.
    pub fn reconcile_orphans(&mut self, policy: OrphanPolicy, now: DateTime<Utc>) -> usize {
        let orphans = std::mem::take(&mut self.downloading);
        let count = orphans.len();
        match policy {
            OrphanPolicy::Requeue => {
                let mut requeued: Vec<Job> = orphans
                    .into_iter()
                    .map(|mut job| {
                        job.status = Status::Queued;
                        job.progress = 0;
                        job.started_at = None;
                        job
                    })
                    .collect();
                requeued.append(&mut self.queued);
                self.queued = requeued;
            }
            OrphanPolicy::Fail => {
                self.failed.extend(orphans.into_iter().map(|mut job| {
                    job.status = Status::Failed;
                    job.error = Some(INTERRUPTED_REASON.to_string());
                    job.failed_at = Some(now);
                    job
                }));
            }
        }
        count
    }
}

impl From<QueueSnapshot> for PersistedState {
    fn from(snapshot: QueueSnapshot) -> Self {
        Self {
            version: STATE_VERSION,
            queued: snapshot.queued,
            downloading: snapshot.downloading,
            completed: snapshot.completed,
            failed: snapshot.failed,
            quality: snapshot.quality,
            max_concurrent: snapshot.max_concurrent,
        }
    }
}

/// Durable storage for queue state
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Load previously saved state, or `None` if nothing was saved yet
    async fn load(&self) -> Result<Option<PersistedState>>;

    /// Replace the saved state
    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// Save after a progress update, where only job `id` changed
    ///
    /// `state` is the full state after the update. Backends that can write a
    /// single job override this; the default replaces everything.
    async fn save_progress(&self, state: &PersistedState, id: JobId, progress: u8) -> Result<()> {
        let _ = (id, progress);
        self.save(state).await
    }

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// In-memory [`StateStore`]
///
/// Useful for embedding without durability and for observing what the queue
/// store writes.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: tokio::sync::Mutex<Option<PersistedState>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `state`, as if saved by a previous run
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: tokio::sync::Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// The last saved state
    pub async fn saved(&self) -> Option<PersistedState> {
        self.state.lock().await.clone()
    }

    /// How many times `save` was called
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
