//! Queue store - the four job collections and their atomic transitions.
//!
//! Every job lives in exactly one of `queued`, `downloading`, `completed` or
//! `failed`, and its `status` always names that collection. All reads and
//! transitions go through one async mutex, so the scheduler loop, per-job
//! tasks reporting progress, and external observers never see a half-applied
//! transition.
//!
//! When a [`StateStore`] is attached, every successful mutation is saved while
//! the lock is still held, so saves land in mutation order. Save failures are
//! logged and never fail the transition.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;

use crate::config::validate_max_concurrent;
use crate::error::{Error, Result};
use crate::persistence::{PersistedState, StateStore};
use crate::types::{Job, JobId, NewJob, Quality, QueueSnapshot, QueueStats, Status};

/// Mutable queue contents, only ever touched under the store's lock
#[derive(Debug)]
struct QueueState {
    queued: VecDeque<Job>,
    downloading: Vec<Job>,
    completed: Vec<Job>,
    failed: Vec<Job>,
    quality: Quality,
    max_concurrent: usize,
    next_id: i64,
}

impl QueueState {
    fn to_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queued: self.queued.iter().cloned().collect(),
            downloading: self.downloading.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            quality: self.quality,
            max_concurrent: self.max_concurrent,
        }
    }

    fn stats(&self) -> QueueStats {
        let queued = self.queued.len();
        let downloading = self.downloading.len();
        let completed = self.completed.len();
        let failed = self.failed.len();
        QueueStats {
            queued,
            downloading,
            completed,
            failed,
            total: queued + downloading + completed + failed,
        }
    }

    /// Source references that block a new job for the same track
    fn active_sources(&self) -> HashSet<String> {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .map(|job| job.source_ref.clone())
            .collect()
    }

    fn is_source_active(&self, source_ref: &str) -> bool {
        self.queued
            .iter()
            .chain(&self.downloading)
            .chain(&self.completed)
            .any(|job| job.source_ref == source_ref)
    }

    fn allocate_id(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }

    fn take_downloading(&mut self, id: JobId) -> Result<Job> {
        let pos = self
            .downloading
            .iter()
            .position(|job| job.id == id)
            .ok_or(Error::NotFound {
                id,
                expected: Status::Downloading,
            })?;
        Ok(self.downloading.remove(pos))
    }
}

/// Lightweight view used by the scheduler loop for one admission decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdmissionView {
    /// Oldest queued job, if any
    pub(crate) head: Option<JobId>,
    pub(crate) queued: usize,
    pub(crate) downloading: usize,
    pub(crate) max_concurrent: usize,
}

/// Normalise restored jobs into `status`
///
/// With `seen`, jobs whose `source_ref` is already in it are dropped. Failed
/// jobs pass `None` since a track may have failed more than once.
fn load_collection(
    jobs: Vec<Job>,
    status: Status,
    mut seen: Option<&mut HashSet<String>>,
) -> Vec<Job> {
    jobs.into_iter()
        .filter_map(|mut job| {
            if let Some(seen) = seen.as_mut()
                && !seen.insert(job.source_ref.clone())
            {
                tracing::warn!(
                    job_id = job.id.0,
                    source_ref = %job.source_ref,
                    status = %status,
                    "Dropping duplicate job from restored state"
                );
                return None;
            }
            if job.progress > 100 {
                tracing::warn!(
                    job_id = job.id.0,
                    progress = job.progress,
                    "Clamping out-of-range progress in restored state"
                );
                job.progress = 100;
            }
            job.status = status;
            Some(job)
        })
        .collect()
}

/// Holds all jobs and exposes the allowed state transitions
pub struct QueueStore {
    inner: tokio::sync::Mutex<QueueState>,
    state_store: Option<Arc<dyn StateStore>>,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("state_store", &self.state_store.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

impl QueueStore {
    /// Create an empty store
    pub fn new(
        quality: Quality,
        max_concurrent: usize,
        state_store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self> {
        Self::from_persisted(PersistedState::empty(quality, max_concurrent), state_store)
    }

    /// Create a store from previously persisted state
    ///
    /// Jobs are placed in the collection they were saved in and their status is
    /// normalised to match it. Progress above 100 is clamped. A queued,
    /// downloading or completed job whose track is already held by another of
    /// those jobs is dropped with a warning; downloading wins over completed,
    /// which wins over queued.
    ///
    /// Orphaned `downloading` jobs should be reconciled before calling this
    /// (see [`PersistedState::reconcile_orphans`]); any left over stay in
    /// `downloading` and occupy a slot until failed or completed.
    pub fn from_persisted(
        state: PersistedState,
        state_store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self> {
        validate_max_concurrent(state.max_concurrent)?;
        let next_id = state.max_job_id().map_or(1, |max| max + 1);

        let mut seen = HashSet::new();
        let downloading =
            load_collection(state.downloading, Status::Downloading, Some(&mut seen));
        let completed = load_collection(state.completed, Status::Completed, Some(&mut seen));
        let queued = load_collection(state.queued, Status::Queued, Some(&mut seen));
        let failed = load_collection(state.failed, Status::Failed, None);

        let inner = QueueState {
            queued: queued.into(),
            downloading,
            completed,
            failed,
            quality: state.quality,
            max_concurrent: state.max_concurrent,
            next_id,
        };

        Ok(Self {
            inner: tokio::sync::Mutex::new(inner),
            state_store,
        })
    }

    /// Save the current state (called with the lock held)
    async fn persist(&self, state: &QueueState) {
        let Some(store) = &self.state_store else {
            return;
        };
        let persisted = PersistedState::from(state.to_snapshot());
        if let Err(e) = store.save(&persisted).await {
            tracing::warn!(
                backend = store.name(),
                error = %e,
                "Failed to save queue state"
            );
        }
    }

    /// Save after a progress update (called with the lock held)
    async fn persist_progress(&self, state: &QueueState, id: JobId, progress: u8) {
        let Some(store) = &self.state_store else {
            return;
        };
        let persisted = PersistedState::from(state.to_snapshot());
        if let Err(e) = store.save_progress(&persisted, id, progress).await {
            tracing::warn!(
                backend = store.name(),
                job_id = id.0,
                error = %e,
                "Failed to save job progress"
            );
        }
    }

    /// Save the current state outside of any transition
    ///
    /// Unlike the saves made by transitions, a failure here is returned.
    pub async fn flush(&self) -> Result<()> {
        let Some(store) = &self.state_store else {
            return Ok(());
        };
        let state = self.inner.lock().await;
        store.save(&PersistedState::from(state.to_snapshot())).await
    }

    /// Add jobs to the back of the queue, skipping duplicates
    ///
    /// An input is skipped when its `source_ref` matches a queued,
    /// downloading or completed job, or an earlier input of the same batch.
    /// Failed jobs do not block a new job for the same track. Returns the
    /// admitted jobs in input order.
    pub async fn enqueue(&self, inputs: impl IntoIterator<Item = NewJob>) -> Vec<Job> {
        let mut state = self.inner.lock().await;
        let mut seen = state.active_sources();
        let now = Utc::now();

        let mut admitted = Vec::new();
        for input in inputs {
            if !seen.insert(input.source_ref.clone()) {
                tracing::debug!(source_ref = %input.source_ref, "Skipping duplicate job");
                continue;
            }
            let id = state.allocate_id();
            let job = Job::queued(id, input, now);
            state.queued.push_back(job.clone());
            admitted.push(job);
        }

        if !admitted.is_empty() {
            self.persist(&state).await;
        }
        admitted
    }

    /// Move a queued job into `downloading`
    ///
    /// Fails with [`Error::NotFound`] if the job is no longer queued, e.g.
    /// because the caller removed it after the scheduler looked.
    pub async fn dequeue_to_downloading(&self, id: JobId) -> Result<Job> {
        let mut state = self.inner.lock().await;
        let pos = state
            .queued
            .iter()
            .position(|job| job.id == id)
            .ok_or(Error::NotFound {
                id,
                expected: Status::Queued,
            })?;
        let mut job = state.queued.remove(pos).ok_or(Error::NotFound {
            id,
            expected: Status::Queued,
        })?;

        job.status = Status::Downloading;
        job.progress = 0;
        job.started_at = Some(Utc::now());
        state.downloading.push(job.clone());

        self.persist(&state).await;
        Ok(job)
    }

    /// Record transfer progress for a downloading job
    ///
    /// Values above 100 are clamped. Updates for jobs that are not
    /// downloading, and updates that would lower the progress, are dropped.
    /// Returns the new progress when it increased.
    pub async fn update_progress(&self, id: JobId, value: u32) -> Option<u8> {
        let value = value.min(100) as u8;
        let mut state = self.inner.lock().await;
        let job = state.downloading.iter_mut().find(|job| job.id == id)?;
        if value <= job.progress {
            return None;
        }
        job.progress = value;
        self.persist_progress(&state, id, value).await;
        Some(value)
    }

    /// Move a downloading job to `completed`
    pub async fn complete_downloading(
        &self,
        id: JobId,
        artifact: impl Into<String>,
        location: Option<String>,
    ) -> Result<Job> {
        let mut state = self.inner.lock().await;
        let mut job = state.take_downloading(id)?;

        job.status = Status::Completed;
        job.progress = 100;
        job.error = None;
        job.artifact = Some(artifact.into());
        job.location = location;
        job.completed_at = Some(Utc::now());
        state.completed.push(job.clone());

        self.persist(&state).await;
        Ok(job)
    }

    /// Move a downloading job to `failed`
    pub async fn fail_downloading(&self, id: JobId, reason: impl Into<String>) -> Result<Job> {
        let mut state = self.inner.lock().await;
        let mut job = state.take_downloading(id)?;

        job.status = Status::Failed;
        job.error = Some(reason.into());
        job.failed_at = Some(Utc::now());
        state.failed.push(job.clone());

        self.persist(&state).await;
        Ok(job)
    }

    /// Move a failed job back to the end of the queue
    ///
    /// The job keeps its id; progress, error and run timestamps are reset and
    /// `added_at` is refreshed. Fails with [`Error::NotFound`] unless the job
    /// is failed, and with [`Error::Duplicate`] if the same track was queued
    /// again in the meantime. Neither failure mutates anything.
    pub async fn retry(&self, id: JobId) -> Result<Job> {
        let mut state = self.inner.lock().await;
        let pos = state
            .failed
            .iter()
            .position(|job| job.id == id)
            .ok_or(Error::NotFound {
                id,
                expected: Status::Failed,
            })?;
        if state.is_source_active(&state.failed[pos].source_ref) {
            return Err(Error::Duplicate(state.failed[pos].source_ref.clone()));
        }

        let mut job = state.failed.remove(pos);
        job.status = Status::Queued;
        job.progress = 0;
        job.error = None;
        job.added_at = Utc::now();
        job.started_at = None;
        job.failed_at = None;
        state.queued.push_back(job.clone());

        self.persist(&state).await;
        Ok(job)
    }

    /// Remove a job that has not started yet
    pub async fn remove(&self, id: JobId) -> Result<Job> {
        let mut state = self.inner.lock().await;
        let pos = state
            .queued
            .iter()
            .position(|job| job.id == id)
            .ok_or(Error::NotFound {
                id,
                expected: Status::Queued,
            })?;
        let job = state.queued.remove(pos).ok_or(Error::NotFound {
            id,
            expected: Status::Queued,
        })?;

        self.persist(&state).await;
        Ok(job)
    }

    /// Drop all completed jobs, returning how many were dropped
    pub async fn clear_completed(&self) -> usize {
        let mut state = self.inner.lock().await;
        let count = state.completed.len();
        state.completed.clear();
        if count > 0 {
            self.persist(&state).await;
        }
        count
    }

    /// Drop all failed jobs, returning how many were dropped
    pub async fn clear_failed(&self) -> usize {
        let mut state = self.inner.lock().await;
        let count = state.failed.len();
        state.failed.clear();
        if count > 0 {
            self.persist(&state).await;
        }
        count
    }

    /// Change the quality requested for jobs admitted from now on
    pub async fn set_quality(&self, quality: Quality) {
        let mut state = self.inner.lock().await;
        if state.quality != quality {
            state.quality = quality;
            self.persist(&state).await;
        }
    }

    /// Change the concurrency limit
    ///
    /// Lowering the limit never interrupts running transfers; admission just
    /// pauses until enough of them finish.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<()> {
        validate_max_concurrent(max_concurrent)?;
        let mut state = self.inner.lock().await;
        if state.max_concurrent != max_concurrent {
            state.max_concurrent = max_concurrent;
            self.persist(&state).await;
        }
        Ok(())
    }

    /// Consistent copy of the whole queue
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.inner.lock().await.to_snapshot()
    }

    /// Counts per status
    pub async fn stats(&self) -> QueueStats {
        self.inner.lock().await.stats()
    }

    /// Current quality setting
    pub async fn quality(&self) -> Quality {
        self.inner.lock().await.quality
    }

    /// Current concurrency limit
    pub async fn max_concurrent(&self) -> usize {
        self.inner.lock().await.max_concurrent
    }

    /// Look up a job by id in any collection
    pub async fn get(&self, id: JobId) -> Option<Job> {
        let state = self.inner.lock().await;
        state
            .queued
            .iter()
            .chain(&state.downloading)
            .chain(&state.completed)
            .chain(&state.failed)
            .find(|job| job.id == id)
            .cloned()
    }

    /// Most relevant job for an upstream track
    ///
    /// Looks at downloading, queued, completed and failed jobs in that order.
    /// Among several failed jobs for the same track the latest one wins.
    pub async fn find_by_source(&self, source_ref: &str) -> Option<Job> {
        let state = self.inner.lock().await;
        state
            .downloading
            .iter()
            .chain(&state.queued)
            .chain(&state.completed)
            .chain(state.failed.iter().rev())
            .find(|job| job.source_ref == source_ref)
            .cloned()
    }

    pub(crate) async fn admission_view(&self) -> AdmissionView {
        let state = self.inner.lock().await;
        AdmissionView {
            head: state.queued.front().map(|job| job.id),
            queued: state.queued.len(),
            downloading: state.downloading.len(),
            max_concurrent: state.max_concurrent,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
